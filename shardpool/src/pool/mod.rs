//! # Sharded Worker Pool Module
//!
//! A task dispatcher that reuses persistent workers instead of spawning one
//! tokio task per unit of work.
//!
//! ## Key Concepts
//! - Shards: independent partitions, each with its own idle workers and
//!   reuse cache
//! - Tiered handoff: two lock-free fast slots, then a spin-locked overflow
//!   list, then a cached or new worker
//! - Rendezvous dispatch: a dispatch resolves once a worker has taken the task
//! - TTL eviction: one cleanup task per pool retires workers idle for longer
//!   than the idle lifetime
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use shardpool::pool::WorkerPool;
//!
//! # async fn example() -> Result<(), shardpool_api::PoolError> {
//! let mut pool = WorkerPool::new(|line: String| async move {
//!     println!("{line}");
//! });
//! pool.set_num_shards(4);
//! pool.set_idle_worker_lifetime(Duration::from_millis(500));
//! pool.start();
//!
//! pool.add_task("hello".to_string()).await?;
//! pool.add_task_for_shard("pinned".to_string(), 3).await?;
//! pool.stop();
//! # Ok(())
//! # }
//! ```

mod cleanup;
mod config;
mod handler;
mod shard;
mod worker;
mod worker_pool;

pub use config::{
    clamp_num_shards, WorkerPoolConfig, DEFAULT_IDLE_WORKER_LIFETIME, DEFAULT_WORKER_CACHE_CAPACITY,
    EVICTION_PROBE_THRESHOLD, MAX_SHARDS,
};
pub use handler::catch_panics;
pub use shard::ShardMetrics;
pub use worker::current_shard;
pub use worker_pool::{PoolMetrics, PoolStatus, WorkerPool};
