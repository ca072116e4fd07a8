//! 程序配置
//!
//! 所有调度常量（分块大小、并发数、重试次数、轮询间隔）都在这里显式声明，
//! 并在构造时传入协调器，而不是散落在代码中的字面量。

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 每个分块包含的单元数量
    pub chunk_size: usize,
    /// 每个阶段同时执行的处理调用数量
    pub stage_concurrency: usize,
    /// 同步调用的最大尝试次数
    pub retry_attempts: usize,
    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,
    /// 远程任务轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 远程任务最大轮询次数
    pub poll_attempts: usize,
    /// 进度快照中保留的最近日志条数
    pub activity_log_capacity: usize,
    /// 已结束批次的保留时长（秒），未设置表示永久保留
    pub retention_secs: Option<u64>,
    /// 待处理文档目录
    pub input_folder: String,
    /// 结果输出目录
    pub output_folder: String,
    /// 处理完成后是否删除输入文件
    pub remove_inputs_after_processing: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub extraction_model: String,
    /// 并行评分模型，每个模型一条轨道
    pub scoring_models: Vec<String>,
    pub validation_model: String,
    // --- 远程抽取服务 ---
    pub extraction_service_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            stage_concurrency: 4,
            retry_attempts: 3,
            retry_delay_ms: 2_000,
            poll_interval_ms: 3_000,
            poll_attempts: 10,
            activity_log_capacity: 10,
            retention_secs: None,
            input_folder: "input".to_string(),
            output_folder: "output".to_string(),
            remove_inputs_after_processing: false,
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            extraction_model: "gpt-4o-mini".to_string(),
            scoring_models: vec!["gpt-4o-mini".to_string()],
            validation_model: "gpt-4o-mini".to_string(),
            extraction_service_url: None,
        }
    }
}

impl Config {
    /// 从环境变量加载，未设置的项使用默认值
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        let config = Self {
            chunk_size: env_parse("CHUNK_SIZE", default.chunk_size, "usize")?,
            stage_concurrency: env_parse("STAGE_CONCURRENCY", default.stage_concurrency, "usize")?,
            retry_attempts: env_parse("RETRY_ATTEMPTS", default.retry_attempts, "usize")?,
            retry_delay_ms: env_parse("RETRY_DELAY_MS", default.retry_delay_ms, "u64")?,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", default.poll_interval_ms, "u64")?,
            poll_attempts: env_parse("POLL_ATTEMPTS", default.poll_attempts, "usize")?,
            activity_log_capacity: env_parse(
                "ACTIVITY_LOG_CAPACITY",
                default.activity_log_capacity,
                "usize",
            )?,
            retention_secs: match std::env::var("RETENTION_SECS") {
                Ok(v) => Some(parse_value("RETENTION_SECS", &v, "u64")?),
                Err(_) => default.retention_secs,
            },
            input_folder: std::env::var("INPUT_FOLDER").unwrap_or(default.input_folder),
            output_folder: std::env::var("OUTPUT_FOLDER").unwrap_or(default.output_folder),
            remove_inputs_after_processing: env_parse(
                "REMOVE_INPUTS_AFTER_PROCESSING",
                default.remove_inputs_after_processing,
                "bool",
            )?,
            verbose_logging: env_parse("VERBOSE_LOGGING", default.verbose_logging, "bool")?,
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            extraction_model: std::env::var("EXTRACTION_MODEL").unwrap_or(default.extraction_model),
            scoring_models: std::env::var("SCORING_MODELS")
                .map(|v| split_list(&v))
                .unwrap_or(default.scoring_models),
            validation_model: std::env::var("VALIDATION_MODEL").unwrap_or(default.validation_model),
            extraction_service_url: std::env::var("EXTRACTION_SERVICE_URL")
                .ok()
                .or(default.extraction_service_url),
        };

        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载，缺省项使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("chunk_size", self.chunk_size),
            ("stage_concurrency", self.stage_concurrency),
            ("retry_attempts", self.retry_attempts),
            ("poll_attempts", self.poll_attempts),
            ("activity_log_capacity", self.activity_log_capacity),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "必须大于 0".to_string(),
                });
            }
        }
        if self.scoring_models.is_empty() {
            return Err(ConfigError::Invalid {
                field: "scoring_models",
                reason: "至少需要一个评分模型".to_string(),
            });
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            chunk_size: self.chunk_size,
            stage_concurrency: self.stage_concurrency,
            activity_log_capacity: self.activity_log_capacity,
            verbose_logging: self.verbose_logging,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_attempts,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: self.retention_secs.map(Duration::from_secs),
        }
    }
}

/// 协调器调度参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub chunk_size: usize,
    pub stage_concurrency: usize,
    pub activity_log_capacity: usize,
    pub verbose_logging: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            stage_concurrency: 4,
            activity_log_capacity: 10,
            verbose_logging: false,
        }
    }
}

/// 同步调用的重试策略：固定次数、固定间隔
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// 远程任务轮询策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 10,
        }
    }
}

/// 已结束批次的保留策略，只在显式清理时生效
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn keep_for(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
        }
    }

    /// 结束时间距今超过保留时长即视为过期
    pub fn is_expired(
        &self,
        completed_at: chrono::DateTime<chrono::Utc>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        match self.max_age {
            Some(max_age) => (now - completed_at)
                .to_std()
                .map(|age| age >= max_age)
                .unwrap_or(false),
            None => false,
        }
    }
}

fn env_parse<T: FromStr>(
    var_name: &str,
    default: T,
    expected_type: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => parse_value(var_name, &value, expected_type),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(
    var_name: &str,
    value: &str,
    expected_type: &'static str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value: value.to_string(),
            expected_type,
        })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
