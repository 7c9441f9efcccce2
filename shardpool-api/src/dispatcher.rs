//! # Task Dispatch Interface
//!
//! `TaskDispatcher` is the surface an embedding application (a connection
//! acceptor, an RPC request dispatcher) programs against. It hands opaque
//! tasks to some execution unit and says nothing about what a task means.
//!
//! ## Semantics
//!
//! - `dispatch` resolves once an execution unit has *taken* the task, not
//!   once it has finished it.
//! - `dispatch_to` pins the task to a partition chosen by `partition`
//!   modulo the partition count. Pinning affects locality only; two tasks
//!   pinned to the same partition may run concurrently.
//! - No ordering is guaranteed across partitions.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shardpool_api::TaskDispatcher;
//!
//! async fn accept_loop(dispatcher: &dyn TaskDispatcher<Request>) {
//!     while let Some(req) = next_request().await {
//!         dispatcher.dispatch_to(req, req.connection_id()).await?;
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::errors::PoolResult;

/// Abstract dispatcher of opaque tasks onto a set of persistent workers.
#[async_trait]
pub trait TaskDispatcher<T: Send + 'static>: Send + Sync {
    /// Hands `task` to an execution unit on an arbitrary partition.
    async fn dispatch(&self, task: T) -> PoolResult<()>;

    /// Hands `task` to an execution unit on partition `partition % partitions()`.
    async fn dispatch_to(&self, task: T, partition: usize) -> PoolResult<()>;

    /// Number of partitions tasks are spread across.
    fn partitions(&self) -> usize;

    /// Snapshot of the number of live execution units.
    fn spawned_workers(&self) -> usize;
}
