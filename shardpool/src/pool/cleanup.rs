use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use super::shard::Shard;

/// Periodic idle-worker eviction, one task per pool.
///
/// Every `period` each shard gives up the idle workers that outlived the TTL
/// and each of them is sent the exit sentinel. The task ends once every shard
/// is stopped and holds no idle worker.
pub(crate) async fn run<T: Send + 'static>(shards: Arc<[Arc<Shard<T>>]>, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let mut evicted = 0usize;
        for shard in shards.iter() {
            let expired = shard.take_expired();
            evicted += expired.len();
            for worker in expired {
                worker.evict().await;
            }
        }
        if evicted > 0 {
            debug!(evicted, "evicted idle workers");
        }

        if shards.iter().all(|shard| shard.is_stopped() && shard.is_drained()) {
            crate::log_pool!("cleanup", "finished");
            break;
        }
    }
}
