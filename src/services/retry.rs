//! 重试与轮询
//!
//! 同步调用：固定次数 + 固定间隔重试，耗尽后返回最后一次错误。
//! 远程任务：提交一次后按固定间隔轮询，明确失败立即返回，次数耗尽视为超时。

use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{PollPolicy, RetryPolicy};
use crate::error::StageError;

/// 远程任务的一次轮询结果
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    /// 仍在处理中
    Pending,
    /// 已完成
    Done(T),
    /// 远程明确返回失败
    Failed(String),
}

/// 按重试策略执行 `op`
///
/// 致命错误（会话不可用）不重试，直接返回
pub async fn retry_with_delay<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, StageError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() || attempt >= max_attempts => {
                if attempt > 1 {
                    warn!("{} 失败，已尝试 {} 次: {}", label, attempt, e);
                }
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "{} 失败 (尝试 {}/{}), {:?} 后重试: {}",
                    label, attempt, max_attempts, policy.delay, e
                );
                sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

/// 按轮询策略检查远程任务状态
///
/// 单次轮询的非致命错误会被记录并计入次数，不会中断轮询
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    label: &str,
    mut check: F,
) -> Result<T, StageError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, StageError>>,
{
    for attempt in 1..=policy.max_attempts {
        sleep(policy.interval).await;

        match check(attempt).await {
            Ok(PollStatus::Done(value)) => {
                debug!("{} 完成 (第 {} 次轮询)", label, attempt);
                return Ok(value);
            }
            Ok(PollStatus::Failed(message)) => return Err(StageError::RemoteFailed(message)),
            Ok(PollStatus::Pending) => {
                debug!("{} 处理中 ({}/{})", label, attempt, policy.max_attempts);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    "{} 轮询出错 ({}/{}): {}",
                    label, attempt, policy.max_attempts, e
                );
            }
        }
    }

    Err(StageError::Timeout {
        attempts: policy.max_attempts,
    })
}
