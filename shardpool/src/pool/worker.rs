use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use flume::{Receiver, Sender};

use super::shard::Shard;

const TICKET_PENDING: u64 = 0;
const TICKET_TAKEN: u64 = 1;
const TICKET_ABANDONED: u64 = 2;

tokio::task_local! {
    static CURRENT_SHARD: usize;
}

/// Index of the shard whose worker is running the current task.
///
/// Returns `None` outside a task handler invoked by a pool worker.
pub fn current_shard() -> Option<usize> {
    CURRENT_SHARD.try_with(|index| *index).ok()
}

/// # Pool Worker
///
/// A persistent execution unit owned by one shard. Tasks reach it through a
/// private zero-capacity channel, so a dispatcher's send completes only once
/// this worker has taken the task. `None` on the channel is the exit
/// sentinel.
///
/// ## State Machine
/// - Running: executing one task through the pool handler
/// - Idle: published in a fast slot or the overflow list of its shard
/// - Terminated: received the sentinel, or its shard refused the republish
///
/// ## Handoff Tickets
/// Every handoff carries a generation number. The worker and the dispatcher
/// race to settle it with one CAS: the worker by accepting the task, the
/// dispatcher by abandoning it when its dispatch future is dropped before
/// the send completed. Whoever wins owns the worker afterwards, so a
/// cancelled dispatch never strands it.
///
/// ## Failure Policy
/// Handler panics are not caught here. The panic unwinds out of the worker
/// task; the live-worker counters are still decremented on the way out, but
/// the worker is not returned to its shard's reuse cache. Callers that want
/// isolation wrap their handler with [`catch_panics`](super::catch_panics).
pub(crate) struct Worker<T> {
    id: u64,
    shard_index: usize,
    sender: Sender<Option<(u64, T)>>,
    receiver: Receiver<Option<(u64, T)>>,
    /// Handoff generation in the high bits, `TICKET_*` state in the low two
    ticket: AtomicU64,
    /// Nanoseconds since the pool epoch at which the worker last went idle
    last_idle: AtomicU64,
    /// Set once the cleanup task or `stop` has chosen this worker for exit
    deleted: AtomicBool,
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("shard_index", &self.shard_index)
            .field("last_idle", &self.last_idle.load(Ordering::Relaxed))
            .field("deleted", &self.deleted.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn new(id: u64, shard_index: usize) -> Self {
        let (sender, receiver) = flume::bounded(0);
        Self {
            id,
            shard_index,
            sender,
            receiver,
            ticket: AtomicU64::new(0),
            last_idle: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn mark_idle(&self, now_nanos: u64) {
        self.last_idle.store(now_nanos, Ordering::Relaxed);
    }

    pub(crate) fn idle_since(&self) -> u64 {
        self.last_idle.load(Ordering::Relaxed)
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Clears the exit marker before a cached worker starts a fresh loop.
    pub(crate) fn revive(&self) {
        self.deleted.store(false, Ordering::Release);
    }

    /// Opens a new handoff generation. Only the current owner of the worker
    /// (the dispatcher that claimed or spawned it) may call this.
    pub(crate) fn issue_ticket(&self) -> u64 {
        let generation = (self.ticket.load(Ordering::Acquire) >> 2) + 1;
        self.ticket.store(generation << 2 | TICKET_PENDING, Ordering::Release);
        generation
    }

    /// Settles the handoff of `generation` in the worker's favour.
    ///
    /// Fails when the dispatcher abandoned it first or a newer handoff has
    /// been issued since.
    fn accept(&self, generation: u64) -> bool {
        self.settle(generation, TICKET_TAKEN)
    }

    /// Settles the handoff of `generation` in the dispatcher's favour. On
    /// success the caller owns the worker again and the task, if it was
    /// delivered anyway, is discarded by the worker.
    pub(crate) fn abandon(&self, generation: u64) -> bool {
        self.settle(generation, TICKET_ABANDONED)
    }

    fn settle(&self, generation: u64, state: u64) -> bool {
        self.ticket
            .compare_exchange(
                generation << 2 | TICKET_PENDING,
                generation << 2 | state,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Synchronous handoff: resolves once this worker has received `task`.
    pub(crate) async fn hand_off(&self, generation: u64, task: T) {
        // Both channel ends live in `self`, so the channel cannot disconnect
        if self.sender.send_async(Some((generation, task))).await.is_err() {
            crate::log_error!(
                "worker channel disconnected",
                worker_id = self.id,
                shard = self.shard_index
            );
        }
    }

    /// Sends the exit sentinel. Does not wait for the loop to finish exiting.
    pub(crate) async fn evict(&self) {
        self.deleted.store(true, Ordering::Release);
        let _ = self.sender.send_async(None).await;
    }

    /// Worker execution loop.
    pub(crate) async fn run(self: Arc<Self>, shard: Arc<Shard<T>>) {
        let live = LiveWorker { shard: &shard };
        crate::log_worker!(self.shard_index, self.id, "started");

        while let Ok(Some((generation, task))) = self.receiver.recv_async().await {
            if !self.accept(generation) {
                // The dispatcher gave up on this handoff and re-homed the worker
                crate::log_worker!(self.shard_index, self.id, "discarded abandoned task");
                continue;
            }
            let handling = (shard.handler())(task);
            CURRENT_SHARD.scope(self.shard_index, handling).await;

            if !shard.set_worker_idle(&self) {
                break;
            }
        }

        crate::log_worker!(self.shard_index, self.id, "exited", evicted = self.is_deleted());
        drop(live);
        shard.recycle(self);
    }
}

/// Keeps the live-worker counters in step with running loops, including
/// loops torn down by a handler panic.
struct LiveWorker<'a, T: Send + 'static> {
    shard: &'a Shard<T>,
}

impl<T: Send + 'static> Drop for LiveWorker<'_, T> {
    fn drop(&mut self) {
        self.shard.worker_exited();
    }
}
