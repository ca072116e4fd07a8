//! 输入清理服务 - 业务能力层
//!
//! 单元的所有阶段结束后删除上传的临时文件。清理失败只记录日志，不影响单元或批次状态。

use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::fs;
use tracing::{info, warn};

use crate::error::SinkError;
use crate::models::UnitInput;

/// 输入清理
#[async_trait]
pub trait InputCleanup: Send + Sync {
    async fn cleanup(&self, input: &UnitInput) -> Result<(), SinkError>;
}

/// 删除输入对应的临时文件
#[derive(Debug, Default)]
pub struct FileInputCleanup;

#[async_trait]
impl InputCleanup for FileInputCleanup {
    async fn cleanup(&self, input: &UnitInput) -> Result<(), SinkError> {
        let Some(path) = input.path.as_deref() else {
            return Ok(());
        };

        match fs::remove_file(path).await {
            Ok(()) => {
                info!(
                    "[{}] 🗑️ 文件已删除: {}",
                    input.id,
                    path.file_name().unwrap_or_default().to_string_lossy()
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("[{}] ⚠️ 文件不存在: {}", input.id, path.display());
                Ok(())
            }
            Err(e) => Err(SinkError::io(path, e)),
        }
    }
}

/// 保留输入文件
#[derive(Debug, Default)]
pub struct NoopInputCleanup;

#[async_trait]
impl InputCleanup for NoopInputCleanup {
    async fn cleanup(&self, _input: &UnitInput) -> Result<(), SinkError> {
        Ok(())
    }
}
