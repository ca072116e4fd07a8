//! 批次状态
//!
//! `BatchState` 是批次与其所有单元的唯一可变记录，只有协调器和服务在写锁下修改它。
//! 批次进入终态后，所有单元修改操作都是返回 `false` 的空操作。

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::{
    BatchId, BatchReport, BatchStatus, BatchSummary, StageOutput, Unit, UnitInput, UnitReport,
    UnitState,
};
use crate::orchestrator::pipeline::Pipeline;
use crate::orchestrator::progress::{ActivityLog, LogLevel, StateCounts};

/// 一条轨道上所有单元的状态
#[derive(Debug, Clone)]
pub struct TrackState {
    name: String,
    stages: Vec<String>,
    units: Vec<Unit>,
}

impl TrackState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn is_complete(&self) -> bool {
        self.units.iter().all(Unit::is_terminal)
    }
}

/// 批次状态
#[derive(Debug)]
pub struct BatchState {
    id: BatchId,
    status: BatchStatus,
    inputs: Arc<[UnitInput]>,
    tracks: Vec<TrackState>,
    output_location: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    fatal_error: Option<String>,
    activity: ActivityLog,
    cancel_requested: bool,
    /// 每个单元还有多少条轨道未到达终态
    open_tracks: Vec<usize>,
    /// 每个单元的输入是否已清理
    cleaned: Vec<bool>,
}

impl BatchState {
    pub fn new(
        id: BatchId,
        inputs: Vec<UnitInput>,
        pipeline: &Pipeline,
        activity_capacity: usize,
        output_location: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let tracks = pipeline
            .tracks()
            .iter()
            .map(|track| {
                let final_stage = track.final_stage().unwrap_or_default();
                TrackState {
                    name: track.name.clone(),
                    stages: track.stage_names(),
                    units: inputs
                        .iter()
                        .map(|input| Unit::new(input.id.clone(), final_stage))
                        .collect(),
                }
            })
            .collect::<Vec<_>>();

        let unit_count = inputs.len();
        Self {
            id,
            status: BatchStatus::Created,
            inputs: inputs.into(),
            open_tracks: vec![tracks.len(); unit_count],
            cleaned: vec![false; unit_count],
            tracks,
            output_location,
            created_at: now,
            started_at: None,
            completed_at: None,
            fatal_error: None,
            activity: ActivityLog::new(activity_capacity),
            cancel_requested: false,
        }
    }

    // ========== 只读访问 ==========

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn inputs(&self) -> Arc<[UnitInput]> {
        self.inputs.clone()
    }

    pub fn tracks(&self) -> &[TrackState] {
        &self.tracks
    }

    pub fn unit(&self, track: usize, unit: usize) -> Option<&Unit> {
        self.tracks.get(track).and_then(|t| t.units.get(unit))
    }

    pub fn output_location(&self) -> Option<&str> {
        self.output_location.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal_error.as_deref()
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// 从开始处理到结束（或当前）的耗时，未开始为零
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.started_at {
            Some(started) => (self.completed_at.unwrap_or(now) - started)
                .to_std()
                .unwrap_or_default(),
            None => Duration::ZERO,
        }
    }

    /// 计数按 (单元, 轨道) 记录统计，与 `total_records` 同一口径
    pub fn summary(&self) -> BatchSummary {
        let counts = StateCounts::from_units(self.tracks.iter().flat_map(|t| t.units.iter()));
        BatchSummary {
            id: self.id.clone(),
            status: self.status,
            total_units: self.inputs.len(),
            total_records: counts.total,
            tracks: self.tracks.iter().map(|t| t.name.clone()).collect(),
            pending: counts.pending,
            // 已开始但尚未走完所有阶段
            in_progress: counts.total - counts.pending - counts.terminal(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            cancelled: counts.cancelled,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    pub fn report(&self, now: DateTime<Utc>) -> BatchReport {
        let units = self
            .tracks
            .iter()
            .flat_map(|track| {
                track.units.iter().map(move |unit| UnitReport {
                    track: track.name.clone(),
                    unit_id: unit.id.clone(),
                    state: unit.state.clone(),
                    error: unit.error.clone(),
                    retry_count: unit.retry_count,
                    results: unit.stage_results.clone(),
                    started_at: unit.started_at,
                    finished_at: unit.finished_at,
                })
            })
            .collect();

        BatchReport {
            summary: self.summary(),
            elapsed_secs: self.elapsed(now).as_secs_f64(),
            fatal_error: self.fatal_error.clone(),
            units,
        }
    }

    // ========== 批次级修改 ==========

    /// 按状态机迁移，非法迁移返回 `false`
    pub(crate) fn set_status(&mut self, next: BatchStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        if next == BatchStatus::Processing {
            self.started_at.get_or_insert(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }

    /// 记录取消请求，只有第一次有效
    pub(crate) fn request_cancel(&mut self) -> bool {
        if self.status.is_terminal() || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    pub(crate) fn set_fatal_error(&mut self, message: impl Into<String>) {
        if self.fatal_error.is_none() {
            self.fatal_error = Some(message.into());
        }
    }

    pub(crate) fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.activity.push(level, message, Utc::now());
    }

    // ========== 单元级修改 ==========

    fn unit_mut(&mut self, track: usize, unit: usize) -> Option<&mut Unit> {
        if self.status.is_terminal() {
            return None;
        }
        self.tracks.get_mut(track).and_then(|t| t.units.get_mut(unit))
    }

    fn close_track_for(&mut self, unit: usize) {
        if let Some(open) = self.open_tracks.get_mut(unit) {
            *open = open.saturating_sub(1);
        }
    }

    pub(crate) fn begin_stage(
        &mut self,
        track: usize,
        unit: usize,
        stage: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.unit_mut(track, unit)
            .map(|u| u.begin_stage(stage, now))
            .unwrap_or(false)
    }

    pub(crate) fn complete_stage(
        &mut self,
        track: usize,
        unit: usize,
        stage: &str,
        output: StageOutput,
        now: DateTime<Utc>,
    ) -> bool {
        let (done, terminal) = match self.unit_mut(track, unit) {
            Some(u) => (u.complete_stage(stage, output, now), u.is_terminal()),
            None => return false,
        };
        if done && terminal {
            self.close_track_for(unit);
        }
        done
    }

    pub(crate) fn fail_unit(
        &mut self,
        track: usize,
        unit: usize,
        error: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let failed = self
            .unit_mut(track, unit)
            .map(|u| u.fail(error, now))
            .unwrap_or(false);
        if failed {
            self.close_track_for(unit);
        }
        failed
    }

    /// 把轨道上所有尚未开始的单元标记为已取消，返回取消数量
    pub(crate) fn cancel_pending_in_track(&mut self, track: usize, now: DateTime<Utc>) -> usize {
        if self.status.is_terminal() {
            return 0;
        }

        let mut cancelled = Vec::new();
        if let Some(t) = self.tracks.get_mut(track) {
            for (index, unit) in t.units.iter_mut().enumerate() {
                if unit.cancel(now) {
                    cancelled.push(index);
                }
            }
        }
        for &index in &cancelled {
            self.close_track_for(index);
        }
        cancelled.len()
    }

    pub(crate) fn cancel_all_pending(&mut self, now: DateTime<Utc>) -> usize {
        (0..self.tracks.len())
            .map(|track| self.cancel_pending_in_track(track, now))
            .sum()
    }

    /// 取出所有轨道都已结束、且尚未清理的单元下标
    pub(crate) fn take_cleanup_ready(&mut self) -> Vec<usize> {
        let ready: Vec<usize> = (0..self.cleaned.len())
            .filter(|&i| !self.cleaned[i] && self.open_tracks[i] == 0)
            .collect();
        for &i in &ready {
            self.cleaned[i] = true;
        }
        ready
    }

    /// 取出所有尚未清理的单元下标（批次结束时使用）
    pub(crate) fn take_uncleaned(&mut self) -> Vec<usize> {
        let remaining: Vec<usize> = (0..self.cleaned.len()).filter(|&i| !self.cleaned[i]).collect();
        for &i in &remaining {
            self.cleaned[i] = true;
        }
        remaining
    }
}

/// 协调器控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Cancel,
}

/// 注册表持有的批次句柄
///
/// - 状态在 `parking_lot::RwLock` 下，锁不跨越 `.await`
/// - 暂停/恢复/取消通过 `watch` 控制通道传给协调器
/// - 批次结束且汇总、清理都完成后，`settled` 通道发布最终状态
pub struct BatchHandle {
    id: BatchId,
    state: RwLock<BatchState>,
    control: watch::Sender<Control>,
    settled: watch::Sender<Option<BatchStatus>>,
}

impl BatchHandle {
    pub fn new(state: BatchState) -> Self {
        let (control, _) = watch::channel(Control::Run);
        let (settled, _) = watch::channel(None);
        Self {
            id: state.id().clone(),
            state: RwLock::new(state),
            control,
            settled,
        }
    }

    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn read<R>(&self, f: impl FnOnce(&BatchState) -> R) -> R {
        f(&*self.state.read())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut BatchState) -> R) -> R {
        f(&mut *self.state.write())
    }

    pub fn status(&self) -> BatchStatus {
        self.state.read().status()
    }

    pub(crate) fn signal(&self, control: Control) {
        self.control.send_replace(control);
    }

    pub(crate) fn control(&self) -> watch::Receiver<Control> {
        self.control.subscribe()
    }

    pub(crate) fn settle(&self, status: BatchStatus) {
        self.settled.send_replace(Some(status));
    }

    /// 批次已结束且收尾工作已完成
    pub fn settled(&self) -> Option<BatchStatus> {
        *self.settled.borrow()
    }

    /// 等待批次结束并完成收尾
    pub async fn wait_settled(&self) -> BatchStatus {
        let mut rx = self.settled.subscribe();
        let settled = rx.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        settled.unwrap_or_else(|| self.status())
    }
}
