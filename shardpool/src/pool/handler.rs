use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use shardpool_api::types::{BoxedFuture, TaskHandler};

use super::worker::current_shard;

/// Wraps `handler` so a panicking task is logged instead of tearing down the
/// worker that runs it.
///
/// The pool never does this on its own: without the wrapper a handler panic
/// unwinds out of the worker task.
///
/// ```rust,ignore
/// let handler = catch_panics(handler_fn(|req: Request| async move { serve(req).await }));
/// let pool = WorkerPool::with_handler(handler, WorkerPoolConfig::default());
/// ```
pub fn catch_panics<T: Send + 'static>(handler: TaskHandler<T>) -> TaskHandler<T> {
    Arc::new(move |task: T| -> BoxedFuture<'static, ()> {
        let handler = Arc::clone(&handler);
        let started = panic::catch_unwind(AssertUnwindSafe(move || handler(task)));
        Box::pin(async move {
            let outcome = match started {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(payload) => Err(payload),
            };
            if let Err(payload) = outcome {
                error!(
                    shard = ?current_shard(),
                    "task handler panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
