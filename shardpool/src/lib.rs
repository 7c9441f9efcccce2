// shardpool
//
// A sharded worker pool that reuses persistent tokio workers for opaque
// tasks. See the `pool` module for the scheduler itself.

pub mod logging;
pub mod pool;
pub mod sync;

mod random;

// Re-export commonly used types
pub use pool::{catch_panics, current_shard, PoolMetrics, PoolStatus, ShardMetrics, WorkerPool, WorkerPoolConfig};
pub use shardpool_api::{handler_fn, PoolError, PoolResult, TaskDispatcher, TaskHandler};
