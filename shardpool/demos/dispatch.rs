// Feeds simulated RPC requests through a sharded worker pool.
//
// Run with `cargo run --example dispatch`; set RUST_LOG=shardpool=trace to
// watch workers being spawned, reused and evicted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shardpool::{catch_panics, current_shard, handler_fn, logging, TaskDispatcher, WorkerPool, WorkerPoolConfig};

#[derive(Debug)]
struct Request {
    connection: usize,
    payload: String,
}

async fn feed(dispatcher: &dyn TaskDispatcher<Request>, connections: usize, per_connection: usize) -> anyhow::Result<()> {
    for seq in 0..per_connection {
        for connection in 0..connections {
            let request = Request { connection, payload: format!("req-{seq}") };
            // Requests from one connection stay on one shard
            dispatcher.dispatch_to(request, connection).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_development();

    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    let handler = catch_panics(handler_fn(move |req: Request| {
        let counter = Arc::clone(&counter);
        async move {
            if req.payload == "req-13" && req.connection == 2 {
                panic!("malformed request on connection {}", req.connection);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            counter.fetch_add(1, Ordering::Relaxed);
            logging::debug!(shard = ?current_shard(), connection = req.connection, payload = %req.payload, "served");
        }
    }));

    let config = WorkerPoolConfig {
        num_shards: 4,
        idle_worker_lifetime: Duration::from_millis(200),
        ..WorkerPoolConfig::default()
    };
    let pool = WorkerPool::with_handler(handler, config);
    pool.start();

    feed(&pool, 8, 50).await?;
    logging::info!(metrics = ?pool.metrics(), "dispatch finished");

    tokio::time::sleep(Duration::from_millis(600)).await;
    logging::info!(
        served = served.load(Ordering::Relaxed),
        spawned_workers = pool.spawned_workers(),
        "after idle eviction"
    );

    pool.stop();
    Ok(())
}
