//! # Worker Pool Error Types
//!
//! The pool raises exactly one error of its own: dispatching before the pool
//! has been started. Handler failures are never classified or recovered by
//! the pool, so they do not appear here.
//!
//! ## Usage Example
//!
//! ```rust
//! use shardpool_api::errors::PoolError;
//!
//! fn report(error: PoolError) {
//!     match error {
//!         PoolError::NotStarted => eprintln!("call start() before dispatching"),
//!     }
//! }
//! ```

use thiserror::Error;

/// Error returned by the dispatch operations of a worker pool.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// A task was dispatched before `start` was called.
    ///
    /// The same call succeeds once the pool is started.
    #[error("Worker pool has not been started")]
    NotStarted,
}

/// Result alias for dispatch operations.
pub type PoolResult<T> = Result<T, PoolError>;
