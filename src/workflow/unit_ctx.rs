//! 单元处理上下文
//!
//! 封装"我正在处理哪个批次、哪条轨道上的哪个单元"这一信息

use std::fmt::Display;

use crate::models::BatchId;

/// 单元处理上下文
#[derive(Debug, Clone)]
pub struct UnitCtx {
    /// 批次ID
    pub batch_id: BatchId,

    /// 轨道下标
    pub track_index: usize,

    /// 轨道名称
    pub track: String,

    /// 单元在批次中的下标（从0开始）
    pub unit_index: usize,

    /// 单元ID
    pub unit_id: String,
}

impl UnitCtx {
    pub fn new(
        batch_id: BatchId,
        track_index: usize,
        track: String,
        unit_index: usize,
        unit_id: String,
    ) -> Self {
        Self {
            batch_id,
            track_index,
            track,
            unit_index,
            unit_id,
        }
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[轨道 {} 单元#{} {}]",
            self.track,
            self.unit_index + 1,
            self.unit_id
        )
    }
}
