//! # shardpool API
//!
//! Abstract interface layer for dispatching opaque tasks onto a pool of
//! persistent workers. The concrete sharded pool lives in the `shardpool`
//! crate; applications that only need to feed work in can depend on this
//! crate alone.
//!
//! ## Module Organization
//!
//! - [`dispatcher`]: the `TaskDispatcher` trait
//! - [`errors`]: the pool error type
//! - [`types`]: handler and future aliases

pub mod dispatcher;
pub mod errors;
pub mod types;

pub use dispatcher::TaskDispatcher;
pub use errors::{PoolError, PoolResult};
pub use types::{handler_fn, BoxedFuture, TaskHandler};
