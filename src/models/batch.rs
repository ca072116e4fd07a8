//! 批次模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::stage_output::StageOutput;
use crate::models::unit::UnitState;

/// 批次标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// 生成新的批次标识（UUID v4）
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 批次状态
///
/// ```text
/// Created --start--> Processing --全部单元终态--> Completed
/// Processing --致命错误--> Failed
/// Processing --pause--> Paused --resume--> Processing
/// Created | Processing | Paused --cancel--> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Created,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    /// 状态迁移是否合法
    ///
    /// 暂停请求在最后一个分块执行期间到达时，分块结束后已无工作可暂停，
    /// 因此 `Paused` 也可以直接进入 `Completed` / `Failed`。
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Created, Processing)
                | (Created, Cancelled)
                | (Processing, Paused)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Paused, Processing)
                | (Paused, Cancelled)
                | (Paused, Completed)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Created => "created",
            BatchStatus::Processing => "processing",
            BatchStatus::Paused => "paused",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// `list_batches` 返回的批次概要
///
/// `total_units` 是输入文档数；各状态计数按 (单元, 轨道) 记录统计，
/// 合计等于 `total_records`（文档数 × 轨道数）
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub id: BatchId,
    pub status: BatchStatus,
    pub total_units: usize,
    pub total_records: usize,
    pub tracks: Vec<String>,
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchSummary {
    /// 各状态计数之和
    pub fn accounted(&self) -> usize {
        self.pending + self.in_progress + self.succeeded + self.failed + self.cancelled
    }
}

/// 单个 (单元, 轨道) 的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub track: String,
    pub unit_id: String,
    pub state: UnitState,
    pub error: Option<String>,
    pub retry_count: u32,
    pub results: BTreeMap<String, StageOutput>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 批次报告：进入终态时持久化的汇总（计数、耗时、逐单元结果）
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub elapsed_secs: f64,
    pub fatal_error: Option<String>,
    pub units: Vec<UnitReport>,
}

impl BatchReport {
    /// 查找某条轨道上某个单元的结果
    pub fn unit(&self, track: &str, unit_id: &str) -> Option<&UnitReport> {
        self.units
            .iter()
            .find(|u| u.track == track && u.unit_id == unit_id)
    }
}
