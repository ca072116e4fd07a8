//! # Doc Batch Orchestrator
//!
//! 文档批处理编排引擎：把一批文档送入多阶段流水线（抽取 → 评分 → 交叉校验），
//! 在有限并发下调用不可靠的外部处理服务，并对外提供进度查询和暂停/恢复/取消。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `ConcurrencyLimiter` - 每个阶段的并发槽位，`SlotGuard` 保证槽位只归还一次
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个单元
//! - `StageProcessor` - 阶段处理契约（`LlmStageProcessor` / `RemoteJobProcessor`）
//! - `ResultSink` - 结果持久化能力
//! - `InputCleanup` - 输入清理能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个单元在一条轨道上"的完整处理流程
//! - `UnitCtx` - 上下文封装（批次 + 轨道 + 单元）
//! - `UnitFlow` - 流程编排（槽位 → 处理 → 持久化 → 状态）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_service` - 对调用方暴露的批次操作
//! - `orchestrator/batch_coordinator` - 分块调度、检查点、收尾
//! - `orchestrator/progress` - 只读进度快照
//! - `orchestrator/registry` - 批次注册表
//!
//! ## 模块结构

pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, OrchestratorConfig, PollPolicy, RetentionPolicy, RetryPolicy};
pub use error::{AppError, AppResult, ConfigError, FatalBatchError, SinkError, StageError};
pub use infrastructure::{ConcurrencyLimiter, SlotGuard};
pub use models::{
    BatchId, BatchReport, BatchStatus, BatchSummary, StageKind, StageOutput, Unit, UnitInput,
    UnitReport, UnitState,
};
pub use orchestrator::{
    BatchService, InMemoryJobRegistry, JobRegistry, Pipeline, ProgressSnapshot, TrackDef,
};
pub use services::{
    FileInputCleanup, FileResultSink, InputCleanup, LlmStageProcessor, NoopInputCleanup,
    RemoteJobProcessor, ResultSink, StageInput, StageProcessor, StageRecord,
};
pub use workflow::{UnitCtx, UnitFlow, UnitOutcome};
