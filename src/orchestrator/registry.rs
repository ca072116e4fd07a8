//! 任务注册表
//!
//! 注册表是批次的唯一长期持有者。协调器只在运行期间借用批次句柄。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::BatchId;
use crate::orchestrator::state::BatchHandle;

/// 批次注册表
///
/// 默认实现保存在进程内存中，进程重启后状态丢失
pub trait JobRegistry: Send + Sync {
    fn insert(&self, handle: Arc<BatchHandle>);

    fn get(&self, id: &BatchId) -> Option<Arc<BatchHandle>>;

    fn remove(&self, id: &BatchId) -> Option<Arc<BatchHandle>>;

    fn list(&self) -> Vec<Arc<BatchHandle>>;
}

/// 进程内注册表
#[derive(Default)]
pub struct InMemoryJobRegistry {
    batches: RwLock<HashMap<BatchId, Arc<BatchHandle>>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn insert(&self, handle: Arc<BatchHandle>) {
        self.batches.write().insert(handle.id().clone(), handle);
    }

    fn get(&self, id: &BatchId) -> Option<Arc<BatchHandle>> {
        self.batches.read().get(id).cloned()
    }

    fn remove(&self, id: &BatchId) -> Option<Arc<BatchHandle>> {
        self.batches.write().remove(id)
    }

    fn list(&self) -> Vec<Arc<BatchHandle>> {
        self.batches.read().values().cloned().collect()
    }
}
