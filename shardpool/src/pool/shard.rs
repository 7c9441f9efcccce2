//! # Shard
//!
//! An independent partition of the pool. Each shard owns its idle-worker
//! structures and its reuse cache, so dispatchers on different shards never
//! touch the same memory.
//!
//! ## Idle Tiers
//! 1. Two fast slots, each a single-word atomic (`IdleSlot`); lock-free.
//! 2. The overflow list behind a `SpinLock`, oldest entry at the front and
//!    the most recently idled one at the back.
//! 3. The reuse cache of exited workers (`ArrayQueue`), used only when no
//!    idle worker exists.
//!
//! A worker is owned by exactly one of: its running loop, fast slot 2, fast
//! slot 1, the overflow list, or the code that just allocated it. Every
//! transfer between these owners is a CAS on a slot or happens under the
//! spin-lock.

use std::sync::Arc;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use tokio::runtime::Handle;
use tracing::trace;

use shardpool_api::types::TaskHandler;

use super::config::EVICTION_PROBE_THRESHOLD;
use super::worker::Worker;
use crate::sync::{IdleSlot, SpinLock};

/// State shared by every shard of one running pool.
pub(crate) struct PoolShared<T> {
    handler: TaskHandler<T>,
    idle_worker_lifetime: Duration,
    runtime: Handle,
    epoch: Instant,
    spawned_workers: AtomicUsize,
    next_worker_id: AtomicU64,
}

impl<T> PoolShared<T> {
    pub(crate) fn new(handler: TaskHandler<T>, idle_worker_lifetime: Duration, runtime: Handle) -> Self {
        Self {
            handler,
            idle_worker_lifetime,
            runtime,
            epoch: Instant::now(),
            spawned_workers: AtomicUsize::new(0),
            next_worker_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn spawned_workers(&self) -> usize {
        self.spawned_workers.load(Ordering::Acquire)
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn ttl_nanos(&self) -> u64 {
        u64::try_from(self.idle_worker_lifetime.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Point-in-time view of one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMetrics {
    /// Position of the shard in the pool
    pub index: usize,

    /// Live worker loops belonging to this shard
    pub spawned_workers: usize,

    /// Fast slots currently holding an idle worker (0..=2)
    pub fast_slots_occupied: usize,

    /// Idle workers in the overflow list
    pub overflow_len: usize,

    /// Whether the shard refuses idle workers
    pub stopped: bool,
}

impl ShardMetrics {
    pub fn idle_workers(&self) -> usize {
        self.fast_slots_occupied + self.overflow_len
    }
}

pub(crate) struct Shard<T> {
    index: usize,
    pool: Arc<PoolShared<T>>,
    cache: ArrayQueue<Arc<Worker<T>>>,
    fast1: IdleSlot<Worker<T>>,
    fast2: IdleSlot<Worker<T>>,
    overflow: SpinLock<Vec<Arc<Worker<T>>>>,
    stopped: AtomicBool,
    spawned_workers: AtomicUsize,
}

impl<T: Send + 'static> Shard<T> {
    pub(crate) fn new(index: usize, pool: Arc<PoolShared<T>>, cache_capacity: usize) -> Self {
        Self {
            index,
            pool,
            cache: ArrayQueue::new(cache_capacity.max(1)),
            fast1: IdleSlot::empty(),
            fast2: IdleSlot::empty(),
            overflow: SpinLock::new(Vec::new()),
            stopped: AtomicBool::new(false),
            spawned_workers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn handler(&self) -> &TaskHandler<T> {
        &self.pool.handler
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Hands `task` to an idle worker of this shard, or to a new one.
    ///
    /// Resolves once a worker has received the task.
    pub(crate) async fn dispatch(self: &Arc<Self>, task: T) {
        let worker = match self.claim_idle() {
            Some(worker) => worker,
            None => self.spawn_worker(),
        };
        let generation = worker.issue_ticket();
        let mut pending = PendingHandoff {
            shard: self,
            worker: &worker,
            generation,
            delivered: false,
        };
        worker.hand_off(generation, task).await;
        pending.delivered = true;
    }

    /// Takes back a worker whose handoff was abandoned.
    fn reclaim(&self, worker: Arc<Worker<T>>) {
        trace!(shard = self.index, worker_id = worker.id(), "handoff abandoned");
        if !self.set_worker_idle(&worker) {
            self.retire(worker);
        }
    }

    /// Sends the exit sentinel to an idle worker without waiting for it.
    fn retire(&self, worker: Arc<Worker<T>>) {
        self.pool.runtime.spawn(async move {
            worker.evict().await;
        });
    }

    /// Claims an idle worker: fast slot 2, fast slot 1, then the most
    /// recently idled overflow entry.
    fn claim_idle(&self) -> Option<Arc<Worker<T>>> {
        self.fast2
            .claim()
            .or_else(|| self.fast1.claim())
            .or_else(|| self.overflow.lock().pop())
    }

    fn spawn_worker(self: &Arc<Self>) -> Arc<Worker<T>> {
        let worker = match self.cache.pop() {
            Some(worker) => {
                worker.revive();
                worker
            }
            None => {
                let id = self.pool.next_worker_id.fetch_add(1, Ordering::Relaxed);
                Arc::new(Worker::new(id, self.index))
            }
        };

        self.pool.spawned_workers.fetch_add(1, Ordering::AcqRel);
        self.spawned_workers.fetch_add(1, Ordering::AcqRel);
        self.pool
            .runtime
            .spawn(Arc::clone(&worker).run(Arc::clone(self)));
        worker
    }

    /// Publishes `worker` as idle. Returns `false` when the shard is stopped,
    /// in which case the worker must exit.
    pub(crate) fn set_worker_idle(&self, worker: &Arc<Worker<T>>) -> bool {
        if self.is_stopped() {
            return false;
        }
        worker.mark_idle(self.pool.now_nanos());

        let mut candidate = Arc::clone(worker);
        for slot in [&self.fast2, &self.fast1] {
            match slot.publish(candidate) {
                Ok(()) => return self.confirm_fast_publish(slot, worker),
                Err(back) => candidate = back,
            }
        }
        self.park_overflow(candidate).is_ok()
    }

    /// Re-checks the stopped flag after `worker` landed in `slot`.
    ///
    /// `stop` may have run between the first check and the publish. In that
    /// case the slot is emptied again: if it still holds `worker` the caller
    /// exits, and any other occupant is retired here.
    fn confirm_fast_publish(&self, slot: &IdleSlot<Worker<T>>, worker: &Arc<Worker<T>>) -> bool {
        fence(Ordering::SeqCst);
        if !self.is_stopped() {
            return true;
        }
        match slot.claim() {
            Some(claimed) if Arc::ptr_eq(&claimed, worker) => false,
            Some(other) => {
                self.retire(other);
                true
            }
            None => true,
        }
    }

    fn park_overflow(&self, worker: Arc<Worker<T>>) -> Result<(), Arc<Worker<T>>> {
        let mut idle = self.overflow.lock();
        // `stop` flips the flag under this lock, so nothing lands after its drain
        if self.is_stopped() {
            return Err(worker);
        }
        idle.push(worker);
        Ok(())
    }

    pub(crate) fn worker_exited(&self) {
        self.spawned_workers.fetch_sub(1, Ordering::AcqRel);
        self.pool.spawned_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns an exited worker to the reuse cache; dropped if the cache is full.
    pub(crate) fn recycle(&self, worker: Arc<Worker<T>>) {
        if let Err(worker) = self.cache.push(worker) {
            trace!(shard = self.index, worker_id = worker.id(), "reuse cache full");
        }
    }

    /// Marks the shard stopped and drains its overflow list.
    ///
    /// Workers parked in the fast slots are left alone; they exit when next
    /// claimed or when the cleanup task ages them out.
    pub(crate) fn stop(&self) -> Vec<Arc<Worker<T>>> {
        let mut idle = self.overflow.lock();
        self.stopped.store(true, Ordering::SeqCst);
        std::mem::take(&mut *idle)
    }

    /// Removes every idle worker the cleanup task should evict now.
    pub(crate) fn take_expired(&self) -> Vec<Arc<Worker<T>>> {
        let now = self.pool.now_nanos();
        let ttl = self.pool.ttl_nanos();
        let expired = |worker: &Arc<Worker<T>>| now.saturating_sub(worker.idle_since()) >= ttl;

        let mut evicted: Vec<Arc<Worker<T>>> = {
            let mut idle = self.overflow.lock();
            let boundary = eviction_boundary(idle.as_slice(), &expired);
            idle.drain(..boundary).collect()
        };

        for slot in [&self.fast2, &self.fast1] {
            let Some(worker) = slot.claim() else {
                continue;
            };
            if expired(&worker) {
                evicted.push(worker);
            } else if let Err(worker) = slot.publish(worker) {
                if let Err(worker) = self.park_overflow(worker) {
                    evicted.push(worker);
                }
            }
        }

        evicted
    }

    /// True when no idle worker is parked anywhere in this shard.
    pub(crate) fn is_drained(&self) -> bool {
        // Pairs with the fence in `confirm_fast_publish`
        fence(Ordering::SeqCst);
        !self.fast1.is_occupied() && !self.fast2.is_occupied() && self.overflow.lock().is_empty()
    }

    pub(crate) fn metrics(&self) -> ShardMetrics {
        ShardMetrics {
            index: self.index,
            spawned_workers: self.spawned_workers.load(Ordering::Acquire),
            fast_slots_occupied: usize::from(self.fast1.is_occupied())
                + usize::from(self.fast2.is_occupied()),
            overflow_len: self.overflow.lock().len(),
            stopped: self.is_stopped(),
        }
    }
}

/// Drop guard for a handoff in flight. If the dispatch future is dropped
/// before the send completed and the worker has not accepted the task, the
/// worker goes back to its shard.
struct PendingHandoff<'a, T: Send + 'static> {
    shard: &'a Shard<T>,
    worker: &'a Arc<Worker<T>>,
    generation: u64,
    delivered: bool,
}

impl<T: Send + 'static> Drop for PendingHandoff<'_, T> {
    fn drop(&mut self) {
        if !self.delivered && self.worker.abandon(self.generation) {
            self.shard.reclaim(Arc::clone(self.worker));
        }
    }
}

/// Number of leading overflow entries to evict.
///
/// Short lists are scanned from the front. Lists longer than
/// `EVICTION_PROBE_THRESHOLD` are probed starting at the midpoint, halving the
/// index while the probed entry is still fresh, and everything up to and
/// including the first expired probe is evicted. The probe assumes the list
/// is roughly ordered by idle time; reuse pops from the back, so the order is
/// only approximate and the probe can under- or over-evict.
pub(crate) fn eviction_boundary<W>(idle: &[W], is_expired: impl Fn(&W) -> bool) -> usize {
    let len = idle.len();
    if len > EVICTION_PROBE_THRESHOLD {
        let mut probe = len / 2;
        while probe > 0 && !is_expired(&idle[probe]) {
            probe /= 2;
        }
        if is_expired(&idle[probe]) { probe + 1 } else { 0 }
    } else {
        idle.iter().take_while(|w| is_expired(w)).count()
    }
}
