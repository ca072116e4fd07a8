//! 流水线定义
//!
//! 一个批次由一条或多条轨道组成，每条轨道是按顺序执行的阶段列表。
//! 所有轨道处理同一组单元，互不覆盖对方的结果。

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::services::StageProcessor;

/// 单轨道流水线的默认轨道名
pub const DEFAULT_TRACK: &str = "main";

/// 一个阶段：名称 + 处理器
#[derive(Clone)]
pub struct StageDef {
    pub name: String,
    pub processor: Arc<dyn StageProcessor>,
}

/// 一条轨道
#[derive(Clone)]
pub struct TrackDef {
    pub name: String,
    pub stages: Vec<StageDef>,
}

impl TrackDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// 追加一个阶段
    pub fn stage(mut self, name: impl Into<String>, processor: Arc<dyn StageProcessor>) -> Self {
        self.stages.push(StageDef {
            name: name.into(),
            processor,
        });
        self
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    /// 最后一个阶段成功即视为单元在该轨道上完成
    pub fn final_stage(&self) -> Option<&str> {
        self.stages.last().map(|s| s.name.as_str())
    }
}

/// 流水线
#[derive(Clone, Default)]
pub struct Pipeline {
    tracks: Vec<TrackDef>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只有一个阶段的单轨道流水线
    pub fn single(stage: impl Into<String>, processor: Arc<dyn StageProcessor>) -> Self {
        Self::new().track(TrackDef::new(DEFAULT_TRACK).stage(stage, processor))
    }

    pub fn track(mut self, track: TrackDef) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn tracks(&self) -> &[TrackDef] {
        &self.tracks
    }

    pub fn track_names(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.name.clone()).collect()
    }

    /// 所有不重复的处理器及首次使用它的轨道（同一处理器可被多个阶段复用）
    pub fn distinct_processors(&self) -> Vec<(&str, &Arc<dyn StageProcessor>)> {
        let mut distinct: Vec<(&str, &Arc<dyn StageProcessor>)> = Vec::new();
        for track in &self.tracks {
            for stage in &track.stages {
                if !distinct.iter().any(|(_, p)| Arc::ptr_eq(p, &stage.processor)) {
                    distinct.push((track.name.as_str(), &stage.processor));
                }
            }
        }
        distinct
    }

    /// 至少一条轨道，每条轨道至少一个阶段，名称不可为空或重复
    pub fn validate(&self) -> AppResult<()> {
        if self.tracks.is_empty() {
            return Err(AppError::validation("流水线至少需要一条轨道"));
        }

        let mut track_names = HashSet::new();
        for track in &self.tracks {
            if track.name.trim().is_empty() {
                return Err(AppError::validation("轨道名称不能为空"));
            }
            if !track_names.insert(track.name.as_str()) {
                return Err(AppError::validation(format!("轨道名称重复: {}", track.name)));
            }
            if track.stages.is_empty() {
                return Err(AppError::validation(format!(
                    "轨道 {} 至少需要一个阶段",
                    track.name
                )));
            }

            let mut stage_names = HashSet::new();
            for stage in &track.stages {
                if stage.name.trim().is_empty() {
                    return Err(AppError::validation(format!(
                        "轨道 {} 中存在空的阶段名称",
                        track.name
                    )));
                }
                if !stage_names.insert(stage.name.as_str()) {
                    return Err(AppError::validation(format!(
                        "轨道 {} 中阶段名称重复: {}",
                        track.name, stage.name
                    )));
                }
            }
        }

        Ok(())
    }
}
