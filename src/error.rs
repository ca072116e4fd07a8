use std::path::PathBuf;
use thiserror::Error;

use crate::models::{BatchId, BatchStatus};

/// 应用程序错误类型
///
/// 这些错误在调用边界同步返回给调用方，永远不会进入异步处理循环
#[derive(Debug, Error)]
pub enum AppError {
    /// 调用方输入不合法（例如空批次），不会创建任何状态
    #[error("输入校验失败: {0}")]
    Validation(String),

    /// 引用了不存在（或已删除）的批次
    #[error("批次不存在: {0}")]
    NotFound(BatchId),

    /// 批次当前状态不允许该操作
    #[error("批次 {batch_id} 当前状态为 {status}，不允许执行 {operation}")]
    InvalidState {
        batch_id: BatchId,
        status: BatchStatus,
        operation: &'static str,
    },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 当前线程没有可用的 Tokio 运行时，无法启动后台处理
    #[error("无法启动批次 {batch_id}: {reason}")]
    Runtime { batch_id: BatchId, reason: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn invalid_state(batch_id: &BatchId, status: BatchStatus, operation: &'static str) -> Self {
        AppError::InvalidState {
            batch_id: batch_id.clone(),
            status,
            operation,
        }
    }
}

/// 单个单元在某个阶段上的失败
///
/// 记录在单元上并计入批次统计，除 `SessionUnavailable` 外不会升级为批次失败
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// 处理服务调用失败（网络错误、服务端错误等）
    #[error("处理服务调用失败 ({processor}): {message}")]
    Provider { processor: String, message: String },

    /// 轮询次数耗尽
    #[error("远程任务超时: 已轮询 {attempts} 次")]
    Timeout { attempts: usize },

    /// 远程任务明确返回失败状态
    #[error("远程任务失败: {0}")]
    RemoteFailed(String),

    /// 响应结构不合法
    #[error("响应结构不合法: {0}")]
    MalformedResponse(String),

    /// 结果无法持久化
    #[error("结果持久化失败: {0}")]
    Persist(String),

    /// 共享会话无法建立，影响整个批次
    #[error("共享会话不可用: {0}")]
    SessionUnavailable(String),

    /// 并发限制器已关闭
    #[error("并发限制器 {0} 已关闭")]
    LimiterClosed(String),

    /// 处理任务异常终止
    #[error("处理任务异常终止: {0}")]
    Panicked(String),
}

impl StageError {
    pub fn provider(processor: impl Into<String>, message: impl ToString) -> Self {
        StageError::Provider {
            processor: processor.into(),
            message: message.to_string(),
        }
    }

    /// 是否需要升级为批次级致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::SessionUnavailable(_))
    }
}

/// 批次级致命错误，唯一允许中断处理循环的错误
#[derive(Debug, Clone, Error)]
#[error("批次致命错误 (轨道 {track}): {message}")]
pub struct FatalBatchError {
    pub track: String,
    pub message: String,
}

impl FatalBatchError {
    pub fn new(track: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            message: message.into(),
        }
    }
}

/// 外部写入（结果持久化、输入清理）错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SinkError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: &'static str,
    },

    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
