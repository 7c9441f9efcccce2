use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

// Type aliases for common types
pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased task handler, fixed for the lifetime of a pool and invoked
/// exactly once per dispatched task.
pub type TaskHandler<T> = Arc<dyn Fn(T) -> BoxedFuture<'static, ()> + Send + Sync>;

/// Erases an async function into a [`TaskHandler`].
///
/// ```rust
/// use shardpool_api::types::handler_fn;
///
/// let handler = handler_fn(|n: u64| async move {
///     let _ = n * 2;
/// });
/// let _fut = handler(21);
/// ```
pub fn handler_fn<T, F, Fut>(f: F) -> TaskHandler<T>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |task: T| -> BoxedFuture<'static, ()> { Box::pin(f(task)) })
}
