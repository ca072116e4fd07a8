//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批次的生命周期和调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_service` - 批次服务
//! - 对调用方暴露创建、开始、查询、暂停、恢复、取消、删除、列表等操作
//! - 在调用边界同步返回校验、不存在、状态不允许等错误
//!
//! ### `batch_coordinator` - 批次协调器
//! - 准备共享会话，失败时批次进入 `Failed`
//! - 轨道并发执行，每条轨道按固定大小分块
//! - 每块开始前检查取消和暂停
//! - 汇总写入、输入清理、最终统计
//!
//! ### `state` / `progress` / `registry`
//! - `BatchState`：批次与单元的唯一可变记录
//! - `ProgressSnapshot`：只读的进度快照
//! - `JobRegistry`：批次的唯一长期持有者
//!
//! ## 层次关系
//!
//! ```text
//! batch_service (处理调用方请求)
//!     ↓
//! batch_coordinator (处理 Vec<Unit> × 轨道)
//!     ↓
//! workflow::UnitFlow (处理单个单元在一条轨道上的所有阶段)
//!     ↓
//! services (能力层：stage processor / result sink / input cleanup)
//!     ↓
//! infrastructure (基础设施：ConcurrencyLimiter)
//! ```

pub mod batch_coordinator;
pub mod batch_service;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod state;

// 重新导出主要类型
pub use batch_coordinator::BatchCoordinator;
pub use batch_service::BatchService;
pub use pipeline::{Pipeline, StageDef, TrackDef, DEFAULT_TRACK};
pub use progress::{ActivityLog, LogEntry, LogLevel, ProgressSnapshot, StateCounts, TrackSnapshot};
pub use registry::{InMemoryJobRegistry, JobRegistry};
pub use state::{BatchHandle, BatchState, TrackState};
