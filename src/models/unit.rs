//! 单元（一份输入文档）及其生命周期状态

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::models::stage_output::StageOutput;

/// 调用方提交的单个输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInput {
    /// 批次内唯一的标识
    pub id: String,
    /// 展示用名称（通常是文件名）
    pub name: String,
    /// 文档内容
    #[serde(default)]
    pub content: String,
    /// 上传后的临时文件路径（用于处理完成后的清理）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl UnitInput {
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            content: content.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// 单元状态，任意时刻只处于其中之一
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    InProgress(String),
    Succeeded(String),
    Failed,
    Cancelled,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => write!(f, "pending"),
            UnitState::InProgress(stage) => write!(f, "in_progress[{}]", stage),
            UnitState::Succeeded(stage) => write!(f, "succeeded[{}]", stage),
            UnitState::Failed => write!(f, "failed"),
            UnitState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 单元在某条轨道上的状态记录
///
/// 每个 (单元, 轨道) 对应一条独立记录，兄弟轨道之间互不覆盖。
/// 所有状态迁移方法在迁移不合法时返回 `false` 且不做任何修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub state: UnitState,
    /// 轨道最后一个阶段，`Succeeded` 到达该阶段即为终态
    pub final_stage: String,
    pub stage_results: BTreeMap<String, StageOutput>,
    pub error: Option<String>,
    /// 当前阶段已尝试的次数
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub stage_completed_at: BTreeMap<String, DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Unit {
    pub fn new(id: impl Into<String>, final_stage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: UnitState::Pending,
            final_stage: final_stage.into(),
            stage_results: BTreeMap::new(),
            error: None,
            retry_count: 0,
            started_at: None,
            stage_completed_at: BTreeMap::new(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match &self.state {
            UnitState::Succeeded(stage) => *stage == self.final_stage,
            UnitState::Failed | UnitState::Cancelled => true,
            UnitState::Pending | UnitState::InProgress(_) => false,
        }
    }

    /// 开始某个阶段：`Pending` 或 上一阶段 `Succeeded` → `InProgress`
    pub fn begin_stage(&mut self, stage: &str, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match &self.state {
            UnitState::Pending | UnitState::Succeeded(_) => {}
            UnitState::InProgress(current) if current == stage => return true,
            _ => return false,
        }

        self.state = UnitState::InProgress(stage.to_string());
        self.retry_count = 0;
        self.started_at.get_or_insert(now);
        true
    }

    /// 阶段成功：记录结果，清空错误
    pub fn complete_stage(&mut self, stage: &str, output: StageOutput, now: DateTime<Utc>) -> bool {
        if self.state != UnitState::InProgress(stage.to_string()) {
            return false;
        }

        self.retry_count += 1;
        self.stage_results.insert(stage.to_string(), output);
        self.stage_completed_at.insert(stage.to_string(), now);
        self.error = None;
        self.state = UnitState::Succeeded(stage.to_string());
        if self.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }

    /// 失败：任何非终态均可进入 `Failed`
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }

        if matches!(self.state, UnitState::InProgress(_)) {
            self.retry_count += 1;
        }
        self.error = Some(error.into());
        self.state = UnitState::Failed;
        self.finished_at = Some(now);
        true
    }

    /// 取消：只有尚未开始的单元可以被取消，已派发的单元自然结束
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != UnitState::Pending {
            return false;
        }

        self.state = UnitState::Cancelled;
        self.finished_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage_output::{ScoreResult, StageOutput};

    fn score(value: f64) -> StageOutput {
        StageOutput::Score(ScoreResult {
            score: value,
            rationale: String::new(),
            criteria: Default::default(),
        })
    }

    #[test]
    fn test_walks_through_stages() {
        let now = Utc::now();
        let mut unit = Unit::new("u1", "score");

        assert!(unit.begin_stage("extract", now));
        assert_eq!(unit.state, UnitState::InProgress("extract".into()));
        assert!(!unit.is_terminal());

        assert!(unit.complete_stage("extract", score(1.0), now));
        assert_eq!(unit.state, UnitState::Succeeded("extract".into()));
        assert!(!unit.is_terminal());

        assert!(unit.begin_stage("score", now));
        assert_eq!(unit.retry_count, 0);
        assert!(unit.complete_stage("score", score(2.0), now));
        assert!(unit.is_terminal());
        assert_eq!(unit.stage_results.len(), 2);
        assert!(unit.finished_at.is_some());
    }

    #[test]
    fn test_failure_records_error_and_attempt() {
        let now = Utc::now();
        let mut unit = Unit::new("u2", "score");
        unit.begin_stage("score", now);

        assert!(unit.fail("provider down", now));
        assert_eq!(unit.state, UnitState::Failed);
        assert_eq!(unit.error.as_deref(), Some("provider down"));
        assert_eq!(unit.retry_count, 1);

        // 终态之后不再迁移
        assert!(!unit.begin_stage("score", now));
        assert!(!unit.cancel(now));
        assert!(!unit.fail("again", now));
    }

    #[test]
    fn test_only_pending_units_can_be_cancelled() {
        let now = Utc::now();
        let mut running = Unit::new("a", "score");
        running.begin_stage("score", now);
        assert!(!running.cancel(now));

        let mut pending = Unit::new("b", "score");
        assert!(pending.cancel(now));
        assert!(pending.is_terminal());
    }

    #[test]
    fn test_complete_requires_matching_stage() {
        let now = Utc::now();
        let mut unit = Unit::new("u", "score");
        assert!(!unit.complete_stage("score", score(5.0), now));
        unit.begin_stage("extract", now);
        assert!(!unit.complete_stage("score", score(5.0), now));
    }
}
