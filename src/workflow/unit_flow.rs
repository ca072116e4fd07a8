//! 单元处理流程 - 流程层
//!
//! 核心职责：定义"一个单元在一条轨道上"的完整处理流程
//!
//! 流程顺序（每个阶段）：
//! 1. 申请该阶段的并发槽位
//! 2. 标记单元进入该阶段
//! 3. 调用阶段处理器
//! 4. 持久化结果 → 标记阶段成功
//!
//! 任一阶段失败即为该单元的终态，流程层不做重试

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::infrastructure::ConcurrencyLimiter;
use crate::models::UnitInput;
use crate::orchestrator::pipeline::StageDef;
use crate::orchestrator::state::BatchHandle;
use crate::services::{ResultSink, StageInput, StageRecord};
use crate::utils::logging::truncate_text;
use crate::workflow::unit_ctx::UnitCtx;

/// 单元处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 所有阶段成功
    Succeeded,
    /// 某个阶段失败
    Failed { fatal: bool, error: String },
    /// 单元已不可修改（批次已结束或单元已是终态）
    Skipped,
}

/// 单元处理流程
///
/// - 编排一条轨道上的所有阶段
/// - 只通过批次句柄修改单元状态
/// - 槽位在每个阶段结束时释放，包括失败路径
pub struct UnitFlow {
    handle: Arc<BatchHandle>,
    stages: Vec<StageDef>,
    limiters: Vec<ConcurrencyLimiter>,
    sink: Arc<dyn ResultSink>,
    verbose_logging: bool,
}

impl UnitFlow {
    /// `limiters` 与 `stages` 一一对应
    pub fn new(
        handle: Arc<BatchHandle>,
        stages: Vec<StageDef>,
        limiters: Vec<ConcurrencyLimiter>,
        sink: Arc<dyn ResultSink>,
        verbose_logging: bool,
    ) -> Self {
        Self {
            handle,
            stages,
            limiters,
            sink,
            verbose_logging,
        }
    }

    pub async fn run(&self, ctx: &UnitCtx, input: &UnitInput) -> UnitOutcome {
        let mut previous = BTreeMap::new();

        for (stage, limiter) in self.stages.iter().zip(&self.limiters) {
            let _slot = match limiter.admit().await {
                Ok(slot) => slot,
                Err(e) => return self.fail(ctx, &stage.name, e),
            };

            let began = self.handle.write(|s| {
                s.begin_stage(ctx.track_index, ctx.unit_index, &stage.name, Utc::now())
            });
            if !began {
                debug!("{} 跳过阶段 {}：单元不可修改", ctx, stage.name);
                return UnitOutcome::Skipped;
            }

            debug!("{} ▶ {} ({})", ctx, stage.name, stage.processor.name());

            let output = match stage
                .processor
                .process(StageInput {
                    unit: input,
                    track: &ctx.track,
                    stage: &stage.name,
                    previous: &previous,
                })
                .await
            {
                Ok(output) => output,
                Err(e) => return self.fail(ctx, &stage.name, e),
            };

            if self.verbose_logging {
                let preview = serde_json::to_string(&output).unwrap_or_default();
                info!("{} {} 结果: {}", ctx, stage.name, truncate_text(&preview, 120));
            }

            let persisted = self
                .sink
                .persist(StageRecord {
                    batch_id: &ctx.batch_id,
                    unit_id: &ctx.unit_id,
                    track: &ctx.track,
                    stage: &stage.name,
                    output: &output,
                })
                .await;
            if let Err(e) = persisted {
                return self.fail(ctx, &stage.name, StageError::Persist(e.to_string()));
            }

            let completed = self.handle.write(|s| {
                s.complete_stage(
                    ctx.track_index,
                    ctx.unit_index,
                    &stage.name,
                    output.clone(),
                    Utc::now(),
                )
            });
            if !completed {
                return UnitOutcome::Skipped;
            }

            info!("{} ✓ {} 完成", ctx, stage.name);
            previous.insert(stage.name.clone(), output);
        }

        UnitOutcome::Succeeded
    }

    /// 记录失败，返回失败结果；单元已不可修改时返回 `Skipped`
    fn fail(&self, ctx: &UnitCtx, stage: &str, error: StageError) -> UnitOutcome {
        let message = error.to_string();
        let recorded = self
            .handle
            .write(|s| s.fail_unit(ctx.track_index, ctx.unit_index, &message, Utc::now()));

        if !recorded {
            return UnitOutcome::Skipped;
        }

        warn!("{} ❌ {} 失败: {}", ctx, stage, message);
        UnitOutcome::Failed {
            fatal: error.is_fatal(),
            error: message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::models::{BatchId, BatchReport, BatchStatus, StageKind, StageOutput, UnitState, ValidationResult};
    use crate::orchestrator::pipeline::Pipeline;
    use crate::orchestrator::state::BatchState;
    use crate::services::StageProcessor;
    use async_trait::async_trait;

    struct Agree;

    #[async_trait]
    impl StageProcessor for Agree {
        fn name(&self) -> &str {
            "agree"
        }

        fn kind(&self) -> StageKind {
            StageKind::Validate
        }

        async fn process(&self, _input: StageInput<'_>) -> Result<StageOutput, StageError> {
            Ok(StageOutput::Validation(ValidationResult {
                agreed: true,
                confidence: 0.9,
                notes: String::new(),
            }))
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl ResultSink for BrokenSink {
        async fn persist(&self, _record: StageRecord<'_>) -> Result<(), SinkError> {
            Err(SinkError::io(
                "/readonly",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ))
        }

        async fn persist_summary(&self, _report: &BatchReport) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unpersisted_output_fails_the_unit() {
        let processor: Arc<dyn StageProcessor> = Arc::new(Agree);
        let pipeline = Pipeline::single("validate", processor);
        let input = UnitInput::new("u1", "u1.txt", "text");
        let mut state = BatchState::new(
            BatchId::new(),
            vec![input.clone()],
            &pipeline,
            10,
            None,
            Utc::now(),
        );
        state.set_status(BatchStatus::Processing, Utc::now());
        let handle = Arc::new(BatchHandle::new(state));

        let limiter = ConcurrencyLimiter::new("main/validate", 1);
        let flow = UnitFlow::new(
            handle.clone(),
            pipeline.tracks()[0].stages.clone(),
            vec![limiter.clone()],
            Arc::new(BrokenSink),
            false,
        );
        let ctx = UnitCtx::new(handle.id().clone(), 0, "main".into(), 0, "u1".into());

        let outcome = flow.run(&ctx, &input).await;

        assert!(matches!(outcome, UnitOutcome::Failed { fatal: false, .. }));
        let unit = handle.read(|s| s.unit(0, 0).cloned()).unwrap();
        assert_eq!(unit.state, UnitState::Failed);
        assert!(unit.stage_results.is_empty());
        assert!(unit.error.unwrap().contains("denied"));
        assert_eq!(limiter.in_flight(), 0);
    }
}
