//! 进度报告
//!
//! 快照在读锁下按需计算，只读取批次状态，不做任何修改。
//! 多轨道批次为每条轨道提供独立的子快照，顶层计数为各轨道之和。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::models::{BatchId, BatchStatus, Unit, UnitState};
use crate::orchestrator::state::{BatchState, TrackState};

/// 活动日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// 一条活动日志
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

trait BoundedPush<T> {
    fn push_bounded(&mut self, value: T, max_size: usize);
}

impl<T> BoundedPush<T> for VecDeque<T> {
    #[inline]
    fn push_bounded(&mut self, value: T, max_size: usize) {
        if self.len() >= max_size {
            self.pop_front();
        }
        self.push_back(value);
    }
}

/// 最近活动日志：容量固定，满了丢弃最旧的一条
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, at: DateTime<Utc>) {
        self.entries.push_bounded(
            LogEntry {
                at,
                level,
                message: message.into(),
            },
            self.capacity,
        );
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 按单元状态的计数
///
/// `succeeded_by_stage` 按单元最近成功的阶段计数（包含最后一个阶段），
/// `succeeded` 只统计已完成最后一个阶段的单元
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: BTreeMap<String, usize>,
    pub succeeded_by_stage: BTreeMap<String, usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a Unit>) -> Self {
        let mut counts = StateCounts::default();
        for unit in units {
            counts.total += 1;
            match &unit.state {
                UnitState::Pending => counts.pending += 1,
                UnitState::InProgress(stage) => {
                    *counts.in_progress.entry(stage.clone()).or_default() += 1;
                }
                UnitState::Succeeded(stage) => {
                    *counts.succeeded_by_stage.entry(stage.clone()).or_default() += 1;
                    if unit.is_terminal() {
                        counts.succeeded += 1;
                    }
                }
                UnitState::Failed => counts.failed += 1,
                UnitState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    fn merge(&mut self, other: &StateCounts) {
        self.total += other.total;
        self.pending += other.pending;
        for (stage, n) in &other.in_progress {
            *self.in_progress.entry(stage.clone()).or_default() += n;
        }
        for (stage, n) in &other.succeeded_by_stage {
            *self.succeeded_by_stage.entry(stage.clone()).or_default() += n;
        }
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }

    pub fn in_progress_total(&self) -> usize {
        self.in_progress.values().sum()
    }

    /// 已到达终态的单元数
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// 各状态计数之和，任何时刻都等于 `total`
    pub fn accounted(&self) -> usize {
        self.pending
            + self.in_progress_total()
            + self.succeeded_by_stage.values().sum::<usize>()
            + self.failed
            + self.cancelled
    }
}

/// 单条轨道的子快照
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub name: String,
    pub stages: Vec<String>,
    pub counts: StateCounts,
    /// 该轨道所有单元都已到达终态
    pub complete: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrackSnapshot {
    fn capture(track: &TrackState) -> Self {
        let counts = StateCounts::from_units(track.units());
        let complete = counts.terminal() == counts.total;
        let finished_at = if complete {
            track.units().iter().filter_map(|u| u.finished_at).max()
        } else {
            None
        };

        Self {
            name: track.name().to_string(),
            stages: track.stages().to_vec(),
            counts,
            complete,
            finished_at,
        }
    }
}

/// 批次进度快照
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    /// 输入单元数
    pub total_units: usize,
    /// 所有轨道的计数之和（`counts.total = 单元数 × 轨道数`）
    pub counts: StateCounts,
    pub tracks: Vec<TrackSnapshot>,
    pub all_tracks_complete: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    /// 每秒到达终态的单元数
    pub throughput_per_sec: Option<f64>,
    pub eta_secs: Option<f64>,
    pub recent_activity: Vec<LogEntry>,
    pub fatal_error: Option<String>,
    pub output_location: Option<String>,
}

impl ProgressSnapshot {
    pub fn capture(state: &BatchState, now: DateTime<Utc>) -> Self {
        let tracks: Vec<TrackSnapshot> = state.tracks().iter().map(TrackSnapshot::capture).collect();

        let mut counts = StateCounts::default();
        for track in &tracks {
            counts.merge(&track.counts);
        }
        let all_tracks_complete = !tracks.is_empty() && tracks.iter().all(|t| t.complete);

        let elapsed_secs = state.elapsed(now).as_secs_f64();
        let terminal = counts.terminal();
        let throughput_per_sec = (elapsed_secs > 0.0 && terminal > 0)
            .then(|| terminal as f64 / elapsed_secs);
        let eta_secs = match throughput_per_sec {
            Some(rate) if !state.status().is_terminal() => {
                Some(counts.total.saturating_sub(terminal) as f64 / rate)
            }
            _ => None,
        };

        Self {
            batch_id: state.id().clone(),
            status: state.status(),
            total_units: state.inputs().len(),
            counts,
            tracks,
            all_tracks_complete,
            created_at: state.created_at(),
            started_at: state.started_at(),
            completed_at: state.completed_at(),
            elapsed_secs,
            throughput_per_sec,
            eta_secs,
            recent_activity: state.activity().to_vec(),
            fatal_error: state.fatal_error().map(str::to_string),
            output_location: state.output_location().map(str::to_string),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.counts.succeeded
    }

    pub fn failed(&self) -> usize {
        self.counts.failed
    }

    pub fn cancelled(&self) -> usize {
        self.counts.cancelled
    }

    pub fn track(&self, name: &str) -> Option<&TrackSnapshot> {
        self.tracks.iter().find(|t| t.name == name)
    }
}
