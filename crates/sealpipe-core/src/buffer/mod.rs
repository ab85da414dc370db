pub mod pool;

pub use pool::{AllocationStrategy, BufferPool, PoolMetricsSnapshot, PooledBuffer};
