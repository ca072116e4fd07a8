//! 批次服务
//!
//! 对调用方暴露的全部操作。输入校验、批次不存在、状态不允许等错误都在调用边界同步返回，
//! 不会进入异步处理循环。

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{OrchestratorConfig, RetentionPolicy};
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::{BatchId, BatchReport, BatchStatus, BatchSummary, UnitInput, UnitReport};
use crate::orchestrator::batch_coordinator::{settle_batch, BatchCoordinator};
use crate::orchestrator::pipeline::Pipeline;
use crate::orchestrator::progress::{LogLevel, ProgressSnapshot};
use crate::orchestrator::registry::{InMemoryJobRegistry, JobRegistry};
use crate::orchestrator::state::{BatchHandle, BatchState, Control};
use crate::services::{InputCleanup, NoopInputCleanup, ResultSink};

/// 取消请求的处理方式
enum CancelAction {
    /// 已结束或已请求过取消
    Noop,
    /// 已通知协调器，在下一个分块边界生效
    Signalled,
    /// 尚未开始，已直接取消
    CancelledNow,
}

/// 批次服务
pub struct BatchService {
    pipeline: Pipeline,
    sink: Arc<dyn ResultSink>,
    cleanup: Arc<dyn InputCleanup>,
    registry: Arc<dyn JobRegistry>,
    config: OrchestratorConfig,
    retention: RetentionPolicy,
}

impl BatchService {
    pub fn new(
        pipeline: Pipeline,
        sink: Arc<dyn ResultSink>,
        config: OrchestratorConfig,
    ) -> AppResult<Self> {
        pipeline.validate()?;
        if config.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: "必须大于 0".to_string(),
            }
            .into());
        }
        if config.stage_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "stage_concurrency",
                reason: "必须大于 0".to_string(),
            }
            .into());
        }

        Ok(Self {
            pipeline,
            sink,
            cleanup: Arc::new(NoopInputCleanup),
            registry: Arc::new(InMemoryJobRegistry::new()),
            config,
            retention: RetentionPolicy::default(),
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_input_cleanup(mut self, cleanup: Arc<dyn InputCleanup>) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    fn handle(&self, id: &BatchId) -> AppResult<Arc<BatchHandle>> {
        self.registry
            .get(id)
            .ok_or_else(|| AppError::NotFound(id.clone()))
    }

    /// 创建批次，所有单元为 `Pending`
    pub fn create_batch(&self, inputs: Vec<UnitInput>) -> AppResult<BatchId> {
        if inputs.is_empty() {
            return Err(AppError::validation("批次至少需要一个输入"));
        }

        let mut seen = HashSet::new();
        for input in &inputs {
            if input.id.trim().is_empty() {
                return Err(AppError::validation("输入 ID 不能为空"));
            }
            if !seen.insert(input.id.as_str()) {
                return Err(AppError::validation(format!("输入 ID 重复: {}", input.id)));
            }
        }

        let id = BatchId::new();
        let location = self.sink.location(&id);
        let total = inputs.len();
        let mut state = BatchState::new(
            id.clone(),
            inputs,
            &self.pipeline,
            self.config.activity_log_capacity,
            location,
            Utc::now(),
        );
        state.log(LogLevel::Info, format!("批次已创建: {} 个单元", total));
        self.registry.insert(Arc::new(BatchHandle::new(state)));

        info!("📥 批次 {} 已创建，共 {} 个单元", id, total);
        Ok(id)
    }

    /// 开始处理，只允许从 `Created` 开始
    ///
    /// 处理在后台任务中进行，必须在 Tokio 运行时内调用
    pub fn start_batch(&self, id: &BatchId) -> AppResult<()> {
        let handle = self.handle(id)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| AppError::Runtime {
            batch_id: id.clone(),
            reason: e.to_string(),
        })?;

        handle.write(|s| {
            let status = s.status();
            if status != BatchStatus::Created || !s.set_status(BatchStatus::Processing, Utc::now()) {
                return Err(AppError::invalid_state(id, status, "start"));
            }
            s.log(LogLevel::Info, "批次开始处理");
            Ok(())
        })?;

        let coordinator = BatchCoordinator::new(
            handle,
            self.pipeline.clone(),
            self.sink.clone(),
            self.cleanup.clone(),
            self.config,
        );
        runtime.spawn(coordinator.run_supervised());

        info!("▶️ 批次 {} 开始处理", id);
        Ok(())
    }

    /// 当前进度快照，已结束的批次同样可以查询
    pub fn get_progress(&self, id: &BatchId) -> AppResult<ProgressSnapshot> {
        let handle = self.handle(id)?;
        Ok(handle.read(|s| ProgressSnapshot::capture(s, Utc::now())))
    }

    /// 完整报告（包含每个单元在每条轨道上的结果）
    pub fn batch_report(&self, id: &BatchId) -> AppResult<BatchReport> {
        let handle = self.handle(id)?;
        Ok(handle.read(|s| s.report(Utc::now())))
    }

    pub fn unit_report(&self, id: &BatchId, track: &str, unit_id: &str) -> AppResult<Option<UnitReport>> {
        Ok(self.batch_report(id)?.unit(track, unit_id).cloned())
    }

    /// 暂停，只允许从 `Processing` 暂停；正在执行的分块会继续完成
    pub fn pause_batch(&self, id: &BatchId) -> AppResult<()> {
        let handle = self.handle(id)?;

        handle.write(|s| {
            let status = s.status();
            if status != BatchStatus::Processing
                || s.cancel_requested()
                || !s.set_status(BatchStatus::Paused, Utc::now())
            {
                return Err(AppError::invalid_state(id, status, "pause"));
            }
            s.log(LogLevel::Info, "批次已暂停");
            handle.signal(Control::Pause);
            Ok(())
        })?;

        info!("⏸️ 批次 {} 已暂停", id);
        Ok(())
    }

    /// 恢复，只允许从 `Paused` 恢复
    pub fn resume_batch(&self, id: &BatchId) -> AppResult<()> {
        let handle = self.handle(id)?;

        handle.write(|s| {
            let status = s.status();
            if status != BatchStatus::Paused
                || s.cancel_requested()
                || !s.set_status(BatchStatus::Processing, Utc::now())
            {
                return Err(AppError::invalid_state(id, status, "resume"));
            }
            s.log(LogLevel::Info, "批次已恢复");
            handle.signal(Control::Run);
            Ok(())
        })?;

        info!("▶️ 批次 {} 已恢复", id);
        Ok(())
    }

    /// 取消，幂等
    ///
    /// - 已结束或已请求过取消：直接返回 `Ok`，不重复记录
    /// - 尚未开始：所有单元立即取消，批次直接进入 `Cancelled`
    /// - 处理中或已暂停：在下一个分块边界生效，正在执行的单元自然结束
    pub async fn cancel_batch(&self, id: &BatchId) -> AppResult<()> {
        let handle = self.handle(id)?;

        let action = handle.write(|s| {
            if !s.request_cancel() {
                return CancelAction::Noop;
            }
            s.log(LogLevel::Warn, "收到取消请求");

            if s.status() == BatchStatus::Created {
                let cancelled = s.cancel_all_pending(Utc::now());
                s.set_status(BatchStatus::Cancelled, Utc::now());
                s.log(
                    LogLevel::Warn,
                    format!("批次已取消: 已取消 {} 个单元", cancelled),
                );
                CancelAction::CancelledNow
            } else {
                handle.signal(Control::Cancel);
                CancelAction::Signalled
            }
        });

        match action {
            CancelAction::Noop => {}
            CancelAction::Signalled => warn!("⏹️ 批次 {} 已请求取消", id),
            CancelAction::CancelledNow => {
                warn!("⏹️ 批次 {} 尚未开始，已直接取消", id);
                settle_batch(&handle, self.sink.as_ref(), self.cleanup.as_ref()).await;
            }
        }
        Ok(())
    }

    /// 删除批次；未结束的批次先取消并等待结束，避免遗留正在执行的任务
    pub async fn delete_batch(&self, id: &BatchId) -> AppResult<()> {
        let handle = self.handle(id)?;

        if handle.settled().is_none() {
            self.cancel_batch(id).await?;
            let status = handle.wait_settled().await;
            info!("批次 {} 已结束 ({})，准备删除", id, status);
        }

        self.registry
            .remove(id)
            .ok_or_else(|| AppError::NotFound(id.clone()))?;
        info!("🗑️ 批次 {} 已删除", id);
        Ok(())
    }

    /// 所有批次，按创建时间排序
    pub fn list_batches(&self) -> Vec<BatchSummary> {
        let mut summaries: Vec<BatchSummary> = self
            .registry
            .list()
            .iter()
            .map(|handle| handle.read(|s| s.summary()))
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    /// 等待批次结束并完成收尾，返回最终状态
    pub async fn wait_for_terminal(&self, id: &BatchId) -> AppResult<BatchStatus> {
        let handle = self.handle(id)?;
        Ok(handle.wait_settled().await)
    }

    /// 按保留策略移除过期的已结束批次及其输出，返回被移除的批次
    pub async fn purge_expired(&self) -> Vec<BatchId> {
        let now = Utc::now();
        let expired: Vec<BatchId> = self
            .registry
            .list()
            .iter()
            .filter(|handle| handle.settled().is_some())
            .filter(|handle| {
                handle
                    .read(|s| s.completed_at())
                    .map(|completed_at| self.retention.is_expired(completed_at, now))
                    .unwrap_or(false)
            })
            .map(|handle| handle.id().clone())
            .collect();

        let mut purged = Vec::with_capacity(expired.len());
        for id in expired {
            if self.registry.remove(&id).is_none() {
                continue;
            }
            if let Err(e) = self.sink.discard(&id).await {
                warn!("批次 {} 输出清理失败: {}", id, e);
            }
            info!("🧹 批次 {} 已过期，已移除", id);
            purged.push(id);
        }
        purged
    }
}
