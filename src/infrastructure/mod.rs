//! 基础设施层：持有稀缺的共享资源，只暴露能力

pub mod concurrency_limiter;

pub use concurrency_limiter::{ConcurrencyLimiter, SlotGuard};
