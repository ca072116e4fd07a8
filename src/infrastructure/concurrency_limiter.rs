//! 并发限制器 - 基础设施层
//!
//! 持有阶段内唯一共享的资源：处理调用的并发槽位

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::StageError;

/// 并发限制器
///
/// 职责：
/// - 限制同一阶段同时执行的处理调用数量
/// - `admit()` 在没有空闲槽位时挂起等待（不忙等），等待者按 FIFO 顺序获得槽位
/// - 槽位由 `SlotGuard` 持有，在任何退出路径上（成功、失败、panic）都会且只会归还一次
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    name: Arc<str>,
    limit: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// 创建新的并发限制器，`limit` 至少为 1
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name: Arc::from(name.into()),
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 获取一个槽位
    pub async fn admit(&self) -> Result<SlotGuard, StageError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StageError::LimiterClosed(self.name.to_string()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        debug!("[{}] 获得槽位 ({}/{})", self.name, now, self.limit);

        Ok(SlotGuard {
            in_flight: Arc::clone(&self.in_flight),
            _permit: permit,
        })
    }

    /// 关闭限制器，正在等待和之后的 `admit()` 都会返回错误
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 当前正在执行的调用数量
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 历史最高并发数
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// 当前空闲槽位
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// 槽位凭证，drop 时归还槽位
#[derive(Debug)]
pub struct SlotGuard {
    in_flight: Arc<AtomicUsize>,
    // drop() 先减计数，之后字段 drop 时才归还 permit
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
