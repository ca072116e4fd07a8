//! 阶段处理器契约 - 业务能力层
//!
//! 一次调用只处理一个单元的一个阶段，不关心批次、分块和并发

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::StageError;
use crate::models::{StageKind, StageOutput, UnitInput};

/// 一次阶段调用的输入
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub unit: &'a UnitInput,
    pub track: &'a str,
    pub stage: &'a str,
    /// 同一轨道上之前阶段的结果
    pub previous: &'a BTreeMap<String, StageOutput>,
}

impl<'a> StageInput<'a> {
    /// 可供后续阶段使用的文本：优先使用抽取结果，没有则使用原始内容
    pub fn document_text(&self) -> &'a str {
        self.previous
            .values()
            .find_map(|output| output.as_extraction())
            .map(|r| r.text.as_str())
            .unwrap_or(self.unit.content.as_str())
    }
}

/// 阶段处理器
///
/// 多种阶段（抽取、评分、校验）共享同一契约：成功返回经过校验的结果，失败返回 `StageError`
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// 处理器名称（用于日志）
    fn name(&self) -> &str;

    /// 产出的结果类型
    fn kind(&self) -> StageKind;

    /// 建立共享会话，失败时整个批次进入 `Failed`
    async fn prepare(&self) -> Result<(), StageError> {
        Ok(())
    }

    /// 处理单个单元
    async fn process(&self, input: StageInput<'_>) -> Result<StageOutput, StageError>;
}
