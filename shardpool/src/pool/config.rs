use std::time::Duration;

/// Upper bound on the number of shards a pool is split into.
pub const MAX_SHARDS: usize = 128;

/// Default time a worker may sit idle before the cleanup task evicts it.
pub const DEFAULT_IDLE_WORKER_LIFETIME: Duration = Duration::from_secs(1);

/// Default number of exited workers each shard keeps for reuse.
pub const DEFAULT_WORKER_CACHE_CAPACITY: usize = 1024;

/// Overflow lists longer than this are probed for their eviction boundary
/// instead of scanned linearly.
pub const EVICTION_PROBE_THRESHOLD: usize = 400;

/// Clamps a requested shard count into `1..=MAX_SHARDS`.
pub fn clamp_num_shards(n: usize) -> usize {
    n.clamp(1, MAX_SHARDS)
}

/// Configuration for a [`WorkerPool`](super::WorkerPool).
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of independent shards, clamped to `1..=MAX_SHARDS`
    pub num_shards: usize,

    /// Idle time after which a worker is evicted; also the cleanup tick period
    pub idle_worker_lifetime: Duration,

    /// Exited workers retained per shard for reuse
    pub worker_cache_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_shards: clamp_num_shards(num_cpus::get()),
            idle_worker_lifetime: DEFAULT_IDLE_WORKER_LIFETIME,
            worker_cache_capacity: DEFAULT_WORKER_CACHE_CAPACITY,
        }
    }
}

impl WorkerPoolConfig {
    /// Returns a copy with every field forced into its valid range.
    pub fn normalized(&self) -> Self {
        Self {
            num_shards: clamp_num_shards(self.num_shards),
            idle_worker_lifetime: self.idle_worker_lifetime.max(Duration::from_millis(1)),
            worker_cache_capacity: self.worker_cache_capacity.max(1),
        }
    }
}
