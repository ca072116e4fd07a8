//! 批次协调器 - 编排层
//!
//! ## 职责
//!
//! 驱动一个批次的所有单元走完流水线，是唯一推进单元状态的组件。
//!
//! ## 核心流程
//!
//! 1. **共享会话准备**：调用每个处理器的 `prepare()`，失败即批次致命错误
//! 2. **轨道并行**：所有轨道并发执行，各自独立分块
//! 3. **分块屏障**：第 N 块全部结束后才开始第 N+1 块
//! 4. **检查点**：每块开始前检查取消与暂停
//! 5. **收尾**：进入终态、写入汇总、清理输入、输出统计
//!
//! ## 设计特点
//!
//! - 每个单元一个 `tokio::spawn` 任务，按提交顺序逐个等待
//! - 单元失败只记录在单元上，不中断同块的其他单元
//! - 只有 `FatalBatchError` 会中断处理循环

use chrono::Utc;
use futures::future::join_all;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{FatalBatchError, StageError};
use crate::infrastructure::ConcurrencyLimiter;
use crate::models::{BatchStatus, UnitInput};
use crate::orchestrator::pipeline::{Pipeline, TrackDef};
use crate::orchestrator::progress::LogLevel;
use crate::orchestrator::state::{BatchHandle, Control};
use crate::services::{InputCleanup, ResultSink};
use crate::utils::logging::{log_batch_start, log_chunk_complete, log_chunk_start, print_final_stats};
use crate::workflow::{UnitCtx, UnitFlow, UnitOutcome};

/// 分块开始前的检查结果
enum Checkpoint {
    Continue,
    Cancel,
    /// 其他轨道已发生致命错误
    Abort,
}

/// 轨道结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackOutcome {
    Finished,
    Cancelled,
    Aborted,
}

/// 批次协调器
pub struct BatchCoordinator {
    handle: Arc<BatchHandle>,
    pipeline: Pipeline,
    sink: Arc<dyn ResultSink>,
    cleanup: Arc<dyn InputCleanup>,
    config: OrchestratorConfig,
}

impl BatchCoordinator {
    pub fn new(
        handle: Arc<BatchHandle>,
        pipeline: Pipeline,
        sink: Arc<dyn ResultSink>,
        cleanup: Arc<dyn InputCleanup>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            handle,
            pipeline,
            sink,
            cleanup,
            config,
        }
    }

    /// 在独立任务中运行批次；协调任务异常终止时批次进入 `Failed` 并完成收尾
    pub async fn run_supervised(self) -> BatchStatus {
        let handle = self.handle.clone();
        let sink = self.sink.clone();
        let cleanup = self.cleanup.clone();

        match tokio::spawn(self.run()).await {
            Ok(status) => status,
            Err(e) => {
                if let Some(status) = handle.settled() {
                    error!("❌ 批次 {} 收尾后协调任务异常终止: {}", handle.id(), e);
                    return status;
                }

                let message = StageError::Panicked(format!("协调任务: {}", e)).to_string();
                error!("❌ 批次 {} {}", handle.id(), message);
                handle.write(|s| {
                    s.set_fatal_error(message.clone());
                    s.log(LogLevel::Error, message.clone());
                    s.set_status(BatchStatus::Failed, Utc::now());
                });
                settle_batch(&handle, sink.as_ref(), cleanup.as_ref()).await
            }
        }
    }

    /// 运行批次直到终态，返回最终状态
    pub async fn run(self) -> BatchStatus {
        let inputs = self.handle.read(|s| s.inputs());
        log_batch_start(
            self.handle.id().as_str(),
            inputs.len(),
            &self.pipeline.track_names(),
            self.config.chunk_size,
            self.config.stage_concurrency,
        );

        if let Err(fatal) = self.prepare_processors().await {
            return self.finish_failed(fatal).await;
        }

        let outcomes = join_all(
            self.pipeline
                .tracks()
                .iter()
                .enumerate()
                .map(|(index, track)| self.run_track(index, track, &inputs)),
        )
        .await;

        let mut cancelled = false;
        for outcome in outcomes {
            match outcome {
                Err(fatal) => return self.finish_failed(fatal).await,
                Ok(TrackOutcome::Cancelled) => cancelled = true,
                Ok(TrackOutcome::Finished) | Ok(TrackOutcome::Aborted) => {}
            }
        }

        if cancelled {
            self.finish(BatchStatus::Cancelled).await
        } else {
            self.finish(BatchStatus::Completed).await
        }
    }

    /// 建立共享会话
    async fn prepare_processors(&self) -> Result<(), FatalBatchError> {
        for (track, processor) in self.pipeline.distinct_processors() {
            processor.prepare().await.map_err(|e| {
                FatalBatchError::new(track, format!("{} 初始化失败: {}", processor.name(), e))
            })?;
        }
        Ok(())
    }

    /// 处理一条轨道
    async fn run_track(
        &self,
        track_index: usize,
        track: &TrackDef,
        inputs: &Arc<[UnitInput]>,
    ) -> Result<TrackOutcome, FatalBatchError> {
        let limiters = track
            .stages
            .iter()
            .map(|stage| {
                ConcurrencyLimiter::new(
                    format!("{}/{}", track.name, stage.name),
                    self.config.stage_concurrency,
                )
            })
            .collect();
        let flow = Arc::new(UnitFlow::new(
            self.handle.clone(),
            track.stages.clone(),
            limiters,
            self.sink.clone(),
            self.config.verbose_logging,
        ));

        let total = inputs.len();
        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = total.div_ceil(chunk_size);
        let mut control = self.handle.control();

        // 分块处理
        for (chunk_index, start) in (0..total).step_by(chunk_size).enumerate() {
            match self.checkpoint(&mut control).await {
                Checkpoint::Continue => {}
                Checkpoint::Cancel => {
                    let cancelled = self.handle.write(|s| {
                        let n = s.cancel_pending_in_track(track_index, Utc::now());
                        s.log(
                            LogLevel::Warn,
                            format!("[{}] 已停止分发，{} 个未开始的单元已取消", track.name, n),
                        );
                        n
                    });
                    warn!("[{}] ⏹️ 收到取消，{} 个未开始的单元已取消", track.name, cancelled);
                    self.cleanup_ready(inputs).await;
                    return Ok(TrackOutcome::Cancelled);
                }
                Checkpoint::Abort => {
                    warn!("[{}] 其他轨道发生致命错误，停止分发", track.name);
                    return Ok(TrackOutcome::Aborted);
                }
            }

            let end = (start + chunk_size).min(total);
            let chunk_num = chunk_index + 1;
            log_chunk_start(&track.name, chunk_num, total_chunks, start + 1, end, total);

            // 处理本块
            let outcomes = self
                .dispatch_chunk(track_index, &track.name, &flow, inputs, start..end)
                .await;

            let succeeded = outcomes
                .iter()
                .filter(|o| **o == UnitOutcome::Succeeded)
                .count();
            self.handle.write(|s| {
                s.log(
                    LogLevel::Info,
                    format!(
                        "[{}] 第 {}/{} 块完成: 成功 {}/{}",
                        track.name,
                        chunk_num,
                        total_chunks,
                        succeeded,
                        end - start
                    ),
                )
            });
            log_chunk_complete(&track.name, chunk_num, succeeded, end - start);

            self.cleanup_ready(inputs).await;

            let fatal = outcomes.into_iter().find_map(|outcome| match outcome {
                UnitOutcome::Failed { fatal: true, error } => Some(error),
                _ => None,
            });
            if let Some(message) = fatal {
                let fatal = FatalBatchError::new(&track.name, message);
                self.record_fatal(&fatal);
                return Err(fatal);
            }
        }

        Ok(TrackOutcome::Finished)
    }

    /// 分块开始前：致命错误 → 取消 → 暂停（等待恢复或取消）
    async fn checkpoint(&self, control: &mut watch::Receiver<Control>) -> Checkpoint {
        loop {
            if self.handle.read(|s| s.fatal_error().is_some()) {
                return Checkpoint::Abort;
            }

            let signal = *control.borrow_and_update();
            match signal {
                Control::Run => return Checkpoint::Continue,
                Control::Cancel => return Checkpoint::Cancel,
                Control::Pause => {
                    info!("⏸️ 批次 {} 已暂停，等待恢复", self.handle.id());
                    if control.changed().await.is_err() {
                        return Checkpoint::Cancel;
                    }
                }
            }
        }
    }

    /// 处理单个分块
    async fn dispatch_chunk(
        &self,
        track_index: usize,
        track_name: &str,
        flow: &Arc<UnitFlow>,
        inputs: &Arc<[UnitInput]>,
        range: Range<usize>,
    ) -> Vec<UnitOutcome> {
        let mut chunk_handles = Vec::with_capacity(range.len());

        // 为本块创建并发任务
        for unit_index in range {
            let ctx = UnitCtx::new(
                self.handle.id().clone(),
                track_index,
                track_name.to_string(),
                unit_index,
                inputs[unit_index].id.clone(),
            );
            let flow = flow.clone();
            let inputs = inputs.clone();

            let handle =
                tokio::spawn(async move { flow.run(&ctx, &inputs[ctx.unit_index]).await });
            chunk_handles.push((unit_index, handle));
        }

        // 等待本块所有任务完成
        let mut outcomes = Vec::with_capacity(chunk_handles.len());
        for (unit_index, handle) in chunk_handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("[{} 单元#{}] 任务执行失败: {}", track_name, unit_index + 1, e);
                    let message = StageError::Panicked(e.to_string()).to_string();
                    let recorded = self.handle.write(|s| {
                        s.fail_unit(track_index, unit_index, &message, Utc::now())
                    });
                    outcomes.push(if recorded {
                        UnitOutcome::Failed {
                            fatal: false,
                            error: message,
                        }
                    } else {
                        UnitOutcome::Skipped
                    });
                }
            }
        }

        outcomes
    }

    /// 清理所有轨道都已结束的单元输入
    async fn cleanup_ready(&self, inputs: &Arc<[UnitInput]>) {
        let ready = self.handle.write(|s| s.take_cleanup_ready());
        cleanup_inputs(self.cleanup.as_ref(), inputs, &ready).await;
    }

    /// 记录致命错误并唤醒暂停中的轨道，让它们尽快停止
    fn record_fatal(&self, fatal: &FatalBatchError) {
        let first = self.handle.write(|s| {
            if s.fatal_error().is_some() {
                return false;
            }
            s.set_fatal_error(fatal.to_string());
            s.log(LogLevel::Error, fatal.to_string());
            true
        });
        if first {
            error!("❌ {}", fatal);
            self.handle.signal(Control::Cancel);
        }
    }

    async fn finish_failed(&self, fatal: FatalBatchError) -> BatchStatus {
        self.record_fatal(&fatal);
        self.finish(BatchStatus::Failed).await
    }

    async fn finish(&self, status: BatchStatus) -> BatchStatus {
        let applied = self.handle.write(|s| {
            let from = s.status();
            if !s.set_status(status, Utc::now()) {
                return Err(from);
            }

            let summary = s.summary();
            let message = match status {
                BatchStatus::Completed => format!(
                    "批次处理完成: 成功 {}，失败 {}",
                    summary.succeeded, summary.failed
                ),
                BatchStatus::Cancelled => {
                    format!("批次已取消: 已取消 {} 个单元", summary.cancelled)
                }
                _ => format!("批次状态变更: {} → {}", from, status),
            };
            let level = match status {
                BatchStatus::Failed => LogLevel::Error,
                BatchStatus::Cancelled => LogLevel::Warn,
                _ => LogLevel::Info,
            };
            s.log(level, message);
            Ok(())
        });

        if let Err(from) = applied {
            warn!(
                "批次 {} 无法从 {} 进入 {}",
                self.handle.id(),
                from,
                status
            );
        }

        settle_batch(&self.handle, self.sink.as_ref(), self.cleanup.as_ref()).await
    }
}

/// 批次进入终态后的收尾：写入汇总、清理剩余输入、输出统计，并发布最终状态
pub(crate) async fn settle_batch(
    handle: &BatchHandle,
    sink: &dyn ResultSink,
    cleanup: &dyn InputCleanup,
) -> BatchStatus {
    let (report, inputs, uncleaned, location) = handle.write(|s| {
        (
            s.report(Utc::now()),
            s.inputs(),
            s.take_uncleaned(),
            s.output_location().map(str::to_string),
        )
    });

    if let Err(e) = sink.persist_summary(&report).await {
        error!("批次 {} 汇总写入失败: {}", report.summary.id, e);
    }
    cleanup_inputs(cleanup, &inputs, &uncleaned).await;

    print_final_stats(&report.summary, report.elapsed_secs, location.as_deref());

    let status = report.summary.status;
    handle.settle(status);
    status
}

/// 清理失败只记录日志
async fn cleanup_inputs(cleanup: &dyn InputCleanup, inputs: &[UnitInput], indices: &[usize]) {
    for &index in indices {
        let Some(input) = inputs.get(index) else {
            continue;
        };
        if let Err(e) = cleanup.cleanup(input).await {
            warn!("[{}] ⚠️ 清理输入失败: {}", input.id, e);
        }
    }
}
