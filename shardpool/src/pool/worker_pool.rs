use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::Instrument;

use shardpool_api::dispatcher::TaskDispatcher;
use shardpool_api::errors::{PoolError, PoolResult};
use shardpool_api::types::{handler_fn, TaskHandler};

use super::cleanup;
use super::config::{clamp_num_shards, WorkerPoolConfig};
use super::shard::{PoolShared, Shard, ShardMetrics};
use crate::random;

/// Lifecycle of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, not yet started; dispatch fails with `NotStarted`
    Initializing,

    /// Started and accepting idle workers
    Running,

    /// Stopped; idle workers are draining
    Stopped,
}

/// Metrics about the pool state
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Number of shards
    pub num_shards: usize,

    /// Live worker loops across all shards
    pub spawned_workers: usize,

    /// Workers parked in fast slots or overflow lists
    pub idle_workers: usize,

    /// Current lifecycle status
    pub status: PoolStatus,
}

struct RunningPool<T> {
    shared: Arc<PoolShared<T>>,
    shards: Arc<[Arc<Shard<T>>]>,
}

/// # Sharded Worker Pool
///
/// Dispatches opaque tasks onto persistent workers instead of spawning a
/// task per unit of work. The pool is split into shards; each shard keeps
/// its own idle workers and reuse cache, so unrelated dispatchers rarely
/// contend.
///
/// ## Dispatch
/// `add_task` picks a pseudo-random shard, `add_task_for_shard` pins one.
/// Inside the shard an idle worker is claimed from a fast slot, then from the
/// overflow list, and a new worker is spawned only when none is idle. Both
/// calls resolve once a worker has *taken* the task.
///
/// Two tasks pinned to the same shard are not serialized: when no worker of
/// that shard is idle the second task gets a new worker.
///
/// ## Lifecycle
/// - `start` allocates the shards and launches the single cleanup task
/// - the cleanup task evicts workers idle for longer than the idle lifetime
/// - `stop` marks every shard stopped and sends the exit sentinel to the
///   workers in the overflow lists. Workers parked in fast slots are not
///   drained by `stop`; they exit when next claimed or when their idle time
///   reaches the lifetime, so the pool converges to zero workers eventually
///   rather than immediately.
///
/// ## Cancel Safety
/// Dropping an `add_task` future before it resolves hands the claimed worker
/// back to its shard. The task may or may not have run; it never runs twice.
///
/// ## Failure Policy
/// Handler panics propagate out of the worker task. Use
/// [`catch_panics`](super::catch_panics) to opt into isolation.
pub struct WorkerPool<T: Send + 'static> {
    handler: TaskHandler<T>,
    config: WorkerPoolConfig,
    runtime_handle: Option<Handle>,
    status: Mutex<PoolStatus>,
    running: OnceLock<RunningPool<T>>,
}

impl<T: Send + 'static> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("spawned_workers", &self.spawned_workers())
            .finish()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates a pool with the default configuration: one shard per CPU and a
    /// one second idle lifetime.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_config(handler, WorkerPoolConfig::default())
    }

    pub fn with_config<F, Fut>(handler: F, config: WorkerPoolConfig) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_handler(handler_fn(handler), config)
    }

    /// Creates a pool around an already type-erased handler.
    pub fn with_handler(handler: TaskHandler<T>, config: WorkerPoolConfig) -> Self {
        Self {
            handler,
            config: config.normalized(),
            runtime_handle: None,
            status: Mutex::new(PoolStatus::Initializing),
            running: OnceLock::new(),
        }
    }

    /// Sets the shard count, clamped to `1..=128`. Takes effect at `start`.
    pub fn set_num_shards(&mut self, n: usize) {
        self.config.num_shards = clamp_num_shards(n);
    }

    /// Sets the idle lifetime and cleanup period. Takes effect at `start`.
    pub fn set_idle_worker_lifetime(&mut self, lifetime: Duration) {
        self.config.idle_worker_lifetime = lifetime;
        self.config = self.config.normalized();
    }

    /// Selects the runtime workers and the cleanup task are spawned on.
    pub fn set_runtime_handle(&mut self, handle: Handle) {
        self.runtime_handle = Some(handle);
    }

    pub fn num_shards(&self) -> usize {
        self.config.num_shards
    }

    pub fn idle_worker_lifetime(&self) -> Duration {
        self.config.idle_worker_lifetime
    }

    pub fn status(&self) -> PoolStatus {
        *self.lock_status()
    }

    /// Starts the pool. Calling it again, or after `stop`, does nothing.
    ///
    /// # Panics
    /// Panics when no runtime handle was set and the caller is not inside a
    /// tokio runtime.
    pub fn start(&self) {
        let mut status = self.lock_status();
        if *status != PoolStatus::Initializing {
            return;
        }

        let runtime = self.runtime_handle.clone().unwrap_or_else(Handle::current);
        let lifetime = self.config.idle_worker_lifetime;
        let shared = Arc::new(PoolShared::new(
            Arc::clone(&self.handler),
            lifetime,
            runtime.clone(),
        ));
        let shards: Arc<[Arc<Shard<T>>]> = (0..self.config.num_shards)
            .map(|index| {
                Arc::new(Shard::new(
                    index,
                    Arc::clone(&shared),
                    self.config.worker_cache_capacity,
                ))
            })
            .collect();

        runtime.spawn(
            cleanup::run(Arc::clone(&shards), lifetime).instrument(crate::pool_span!("cleanup")),
        );

        // Only reachable once: the status lock is held and still Initializing
        let _ = self.running.set(RunningPool { shared, shards });
        *status = PoolStatus::Running;
        crate::log_pool!(
            "start",
            "completed",
            num_shards = self.config.num_shards,
            idle_worker_lifetime_ms = lifetime.as_millis() as u64
        );
    }

    /// Stops a running pool. Idempotent, and a no-op before `start`.
    ///
    /// Returns without waiting for in-flight handlers or for the drained
    /// workers to exit.
    pub fn stop(&self) {
        let mut status = self.lock_status();
        if *status != PoolStatus::Running {
            return;
        }
        *status = PoolStatus::Stopped;
        let Some(running) = self.running.get() else {
            return;
        };

        let drained: Vec<_> = running.shards.iter().flat_map(|shard| shard.stop()).collect();
        let count = drained.len();
        if !drained.is_empty() {
            running.shared.runtime().spawn(async move {
                for worker in drained {
                    worker.evict().await;
                }
            });
        }
        crate::log_pool!("stop", "completed", drained_workers = count);
    }

    /// Dispatches `task` to a pseudo-randomly chosen shard.
    ///
    /// Resolves once a worker has taken the task.
    pub async fn add_task(&self, task: T) -> PoolResult<()> {
        let running = self.running.get().ok_or(PoolError::NotStarted)?;
        let index = random::shard_index(running.shards.len());
        running.shards[index].dispatch(task).await;
        Ok(())
    }

    /// Dispatches `task` to shard `shard % num_shards`.
    pub async fn add_task_for_shard(&self, task: T, shard: usize) -> PoolResult<()> {
        let running = self.running.get().ok_or(PoolError::NotStarted)?;
        let index = shard % running.shards.len();
        running.shards[index].dispatch(task).await;
        Ok(())
    }

    /// Snapshot of the number of live workers.
    pub fn spawned_workers(&self) -> usize {
        self.running
            .get()
            .map_or(0, |running| running.shared.spawned_workers())
    }

    pub fn shard_metrics(&self) -> Vec<ShardMetrics> {
        self.running
            .get()
            .map(|running| running.shards.iter().map(|shard| shard.metrics()).collect())
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            num_shards: self.config.num_shards,
            spawned_workers: self.spawned_workers(),
            idle_workers: self.shard_metrics().iter().map(ShardMetrics::idle_workers).sum(),
            status: self.status(),
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, PoolStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl<T: Send + 'static> TaskDispatcher<T> for WorkerPool<T> {
    async fn dispatch(&self, task: T) -> PoolResult<()> {
        self.add_task(task).await
    }

    async fn dispatch_to(&self, task: T, partition: usize) -> PoolResult<()> {
        self.add_task_for_shard(task, partition).await
    }

    fn partitions(&self) -> usize {
        self.num_shards()
    }

    fn spawned_workers(&self) -> usize {
        WorkerPool::spawned_workers(self)
    }
}
