//! 结果持久化服务 - 业务能力层
//!
//! 只负责"把结果写出去"的能力，不关心流程

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::SinkError;
use crate::models::{BatchId, BatchReport, StageOutput};

/// 一次阶段成功后需要持久化的记录
#[derive(Debug, Clone, Copy)]
pub struct StageRecord<'a> {
    pub batch_id: &'a BatchId,
    pub unit_id: &'a str,
    pub track: &'a str,
    pub stage: &'a str,
    pub output: &'a StageOutput,
}

/// 结果持久化
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// 批次输出位置（不透明句柄）
    fn location(&self, _batch_id: &BatchId) -> Option<String> {
        None
    }

    /// 持久化单个阶段结果
    async fn persist(&self, record: StageRecord<'_>) -> Result<(), SinkError>;

    /// 批次进入终态时持久化汇总报告
    async fn persist_summary(&self, report: &BatchReport) -> Result<(), SinkError>;

    /// 批次过期被移除时丢弃其输出
    async fn discard(&self, _batch_id: &BatchId) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 文件结果写入
///
/// 目录结构：
/// ```text
/// {root}/{batch_id}/{unit_id}/{track}__{stage}.json
/// {root}/{batch_id}/summary.json
/// ```
pub struct FileResultSink {
    root: PathBuf,
}

impl FileResultSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn batch_dir(&self, batch_id: &BatchId) -> PathBuf {
        self.root.join(sanitize_component(batch_id.as_str()))
    }

    async fn write_json(path: &Path, bytes: Vec<u8>) -> Result<(), SinkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }
        fs::write(path, bytes)
            .await
            .map_err(|e| SinkError::io(path, e))
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    fn location(&self, batch_id: &BatchId) -> Option<String> {
        Some(self.batch_dir(batch_id).to_string_lossy().to_string())
    }

    async fn persist(&self, record: StageRecord<'_>) -> Result<(), SinkError> {
        let path = self
            .batch_dir(record.batch_id)
            .join(sanitize_component(record.unit_id))
            .join(format!(
                "{}__{}.json",
                sanitize_component(record.track),
                sanitize_component(record.stage)
            ));

        debug!("写入阶段结果: {}", path.display());
        let bytes = serde_json::to_vec_pretty(record.output)?;
        Self::write_json(&path, bytes).await
    }

    async fn persist_summary(&self, report: &BatchReport) -> Result<(), SinkError> {
        let path = self.batch_dir(&report.summary.id).join("summary.json");
        debug!("写入批次汇总: {}", path.display());
        let bytes = serde_json::to_vec_pretty(report)?;
        Self::write_json(&path, bytes).await
    }

    async fn discard(&self, batch_id: &BatchId) -> Result<(), SinkError> {
        let dir = self.batch_dir(batch_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SinkError::io(dir, e)),
        }
    }
}

/// 把任意标识转换为安全的文件名
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        s => s.to_string(),
    }
}
