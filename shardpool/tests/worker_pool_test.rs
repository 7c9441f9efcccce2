use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{Barrier, Notify};
use tokio::time::{sleep, timeout, Instant};

use shardpool::{
    catch_panics, current_shard, handler_fn, PoolError, PoolStatus, TaskDispatcher, WorkerPool,
    WorkerPoolConfig,
};

fn config(num_shards: usize, idle_ms: u64) -> WorkerPoolConfig {
    WorkerPoolConfig {
        num_shards,
        idle_worker_lifetime: Duration::from_millis(idle_ms),
        ..WorkerPoolConfig::default()
    }
}

/// Polls `cond` every few milliseconds until it holds or `limit` elapses.
async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_task_handled_exactly_once() {
    const TASKS: usize = 2_000;
    let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..TASKS).map(|_| AtomicUsize::new(0)).collect());

    let counted = Arc::clone(&hits);
    let pool = Arc::new(WorkerPool::with_config(
        move |task: usize| {
            let counted = Arc::clone(&counted);
            async move {
                counted[task].fetch_add(1, Ordering::SeqCst);
            }
        },
        config(4, 1_000),
    ));
    pool.start();

    let submitters: Vec<_> = (0..8)
        .map(|lane| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for task in (lane..TASKS).step_by(8) {
                    pool.add_task(task).await.unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.await.unwrap();
    }

    let all_seen = wait_until(Duration::from_secs(5), || {
        hits.iter().map(|h| h.load(Ordering::SeqCst)).sum::<usize>() == TASKS
    })
    .await;
    assert!(all_seen, "not every task reached the handler");
    assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));

    pool.stop();
}

#[tokio::test]
async fn test_add_task_before_start_fails() {
    let pool = WorkerPool::with_config(|_: u32| async {}, config(2, 1_000));

    assert_eq!(pool.add_task(1).await, Err(PoolError::NotStarted));
    assert_eq!(pool.add_task_for_shard(1, 5).await, Err(PoolError::NotStarted));
    assert_eq!(pool.spawned_workers(), 0);
    assert!(pool.shard_metrics().is_empty());

    pool.start();
    assert_eq!(pool.status(), PoolStatus::Running);
    assert_eq!(pool.add_task(1).await, Ok(()));
    assert_eq!(pool.add_task_for_shard(2, 5).await, Ok(()));
}

#[tokio::test]
async fn test_shard_index_wraps_modulo_shard_count() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let pool = WorkerPool::with_config(
        move |tag: usize| {
            let record = Arc::clone(&record);
            async move {
                record.lock().unwrap().push((tag, current_shard()));
            }
        },
        config(4, 1_000),
    );
    pool.start();

    for (tag, index) in [(0, 1), (1, 5), (2, 9), (3, 3), (4, 7)] {
        pool.add_task_for_shard(tag, index).await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 5).await);

    for (tag, shard) in seen.lock().unwrap().iter() {
        let expected = if *tag < 3 { 1 } else { 3 };
        assert_eq!(*shard, Some(expected), "task {} ran on the wrong shard", tag);
    }
    assert_eq!(current_shard(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_shard_tasks_run_concurrently() {
    let barrier = Arc::new(Barrier::new(3));
    let gate = Arc::clone(&barrier);
    let pool = WorkerPool::with_config(
        move |_: ()| {
            let gate = Arc::clone(&gate);
            async move {
                gate.wait().await;
            }
        },
        config(4, 1_000),
    );
    pool.start();

    // 2 and 6 are the same shard; the second task must not wait for the first
    pool.add_task_for_shard((), 2).await.unwrap();
    pool.add_task_for_shard((), 6).await.unwrap();

    let metrics = pool.shard_metrics();
    assert_eq!(metrics[2].spawned_workers, 2);
    assert!(metrics.iter().filter(|m| m.index != 2).all(|m| m.spawned_workers == 0));

    timeout(Duration::from_secs(2), barrier.wait())
        .await
        .expect("both handlers should be blocked at the same time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_workers_age_out() {
    let pool = Arc::new(WorkerPool::with_config(|_: usize| async {}, config(4, 50)));
    pool.start();

    let dispatches = (0..500).map(|task| {
        let pool = Arc::clone(&pool);
        async move { pool.add_task(task).await }
    });
    assert!(join_all(dispatches).await.iter().all(Result::is_ok));

    sleep(Duration::from_millis(500)).await;
    assert!(
        wait_until(Duration::from_secs(1), || pool.spawned_workers() == 0).await,
        "idle workers were not evicted: {:?}",
        pool.metrics()
    );
    assert_eq!(pool.metrics().idle_workers, 0);
}

enum Job {
    Rendezvous(Arc<Barrier>),
    Slow(Arc<Notify>),
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_drains_overflow_and_leaves_running_handler_alone() {
    let finished = Arc::new(AtomicUsize::new(0));
    let done = Arc::clone(&finished);
    let pool = WorkerPool::with_config(
        move |job: Job| {
            let done = Arc::clone(&done);
            async move {
                match job {
                    Job::Rendezvous(barrier) => {
                        barrier.wait().await;
                    }
                    Job::Slow(release) => {
                        release.notified().await;
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        },
        config(1, 300),
    );
    pool.start();

    // Four workers held at once, then released: two fast slots, two in overflow
    let barrier = Arc::new(Barrier::new(5));
    for _ in 0..4 {
        pool.add_task(Job::Rendezvous(Arc::clone(&barrier))).await.unwrap();
    }
    barrier.wait().await;
    assert!(wait_until(Duration::from_secs(1), || pool.metrics().idle_workers == 4).await);
    assert_eq!(pool.shard_metrics()[0].overflow_len, 2);

    let release = Arc::new(Notify::new());
    pool.add_task(Job::Slow(Arc::clone(&release))).await.unwrap();

    pool.stop();
    assert_eq!(pool.status(), PoolStatus::Stopped);

    let shard = &pool.shard_metrics()[0];
    assert!(shard.stopped);
    assert_eq!(shard.overflow_len, 0);
    // Fast-slot workers are not drained by stop; they go eventually
    assert_eq!(shard.fast_slots_occupied, 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    assert!(wait_until(Duration::from_secs(1), || pool.spawned_workers() <= 2).await);

    release.notify_one();
    assert!(wait_until(Duration::from_secs(1), || finished.load(Ordering::SeqCst) == 1).await);
    assert!(
        wait_until(Duration::from_secs(2), || pool.spawned_workers() == 0).await,
        "pool did not drain after stop: {:?}",
        pool.shard_metrics()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_blocked_worker_per_shard() {
    let barrier = Arc::new(Barrier::new(5));
    let gate = Arc::clone(&barrier);
    let pool = WorkerPool::with_config(
        move |_: usize| {
            let gate = Arc::clone(&gate);
            async move {
                gate.wait().await;
            }
        },
        config(4, 1_000),
    );
    pool.start();

    let dispatches = (0..4).map(|shard| pool.add_task_for_shard(shard, shard));
    assert!(join_all(dispatches).await.iter().all(Result::is_ok));

    assert_eq!(pool.spawned_workers(), 4);
    assert!(pool.shard_metrics().iter().all(|m| m.spawned_workers == 1));

    timeout(Duration::from_secs(2), barrier.wait()).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || pool.metrics().idle_workers == 4).await);
    assert_eq!(pool.spawned_workers(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_panic_terminates_its_worker() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    let pool = WorkerPool::with_config(
        move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                if n == 0 {
                    panic!("handler failure");
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
        config(1, 1_000),
    );
    pool.start();

    pool.add_task(0).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || pool.spawned_workers() == 0).await);
    assert_eq!(pool.metrics().idle_workers, 0);

    pool.add_task(1).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_catch_panics_keeps_worker_alive() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    let handler = catch_panics(handler_fn(move |n: u32| {
        let counter = Arc::clone(&counter);
        async move {
            if n == 0 {
                panic!("handler failure");
            }
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }));
    let pool = WorkerPool::with_handler(handler, config(1, 1_000));
    pool.start();

    pool.add_task(0).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || pool.metrics().idle_workers == 1).await);
    assert_eq!(pool.spawned_workers(), 1);

    pool.add_task(1).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await);
    assert_eq!(pool.spawned_workers(), 1);
}

#[tokio::test]
async fn test_dispatch_after_stop_runs_task_then_worker_exits() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    let pool = WorkerPool::with_config(
        move |_: u8| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
        config(2, 1_000),
    );
    pool.start();
    pool.stop();

    assert_eq!(pool.add_task(7).await, Ok(()));
    assert!(wait_until(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await);
    assert!(wait_until(Duration::from_secs(1), || pool.spawned_workers() == 0).await);
    assert_eq!(pool.metrics().idle_workers, 0);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let pool = WorkerPool::with_config(|_: u8| async {}, config(2, 1_000));
    pool.start();
    pool.start();
    assert_eq!(pool.status(), PoolStatus::Running);
    assert_eq!(pool.shard_metrics().len(), 2);

    pool.stop();
    pool.stop();
    assert_eq!(pool.status(), PoolStatus::Stopped);

    pool.start();
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let pool = WorkerPool::with_config(|_: u8| async {}, config(2, 1_000));
    pool.stop();
    assert_eq!(pool.status(), PoolStatus::Initializing);
    assert_eq!(pool.add_task(1).await, Err(PoolError::NotStarted));

    pool.start();
    assert_eq!(pool.status(), PoolStatus::Running);
    assert_eq!(pool.add_task(1).await, Ok(()));
}

#[tokio::test]
async fn test_dropped_dispatch_returns_worker_to_shard() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    let pool = WorkerPool::with_config(
        move |_: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
        config(1, 20),
    );
    pool.start();

    // The freshly spawned worker has not been polled yet, so the first poll
    // cannot complete the handoff
    assert!(pool.add_task(1).now_or_never().is_none());
    assert_eq!(pool.spawned_workers(), 1);
    assert_eq!(pool.metrics().idle_workers, 1);

    // The returned worker serves the next dispatch
    pool.add_task(2).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await);
    assert_eq!(pool.spawned_workers(), 1);

    sleep(Duration::from_millis(200)).await;
    assert!(
        wait_until(Duration::from_secs(1), || pool.spawned_workers() == 0).await,
        "worker stranded after a dropped dispatch: {:?}",
        pool.shard_metrics()
    );
    assert_eq!(served.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_dispatches_never_strand_workers() {
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);
    let pool = Arc::new(WorkerPool::with_config(
        move |_: usize| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
        config(2, 30),
    ));
    pool.start();

    let submitters: Vec<_> = (0..4)
        .map(|lane| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for task in 0..200 {
                    if task % 2 == 0 {
                        let _ = pool.add_task(lane * 1_000 + task).now_or_never();
                    } else {
                        pool.add_task(lane * 1_000 + task).await.unwrap();
                    }
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.await.unwrap();
    }

    // Every awaited dispatch ran; dropped ones ran at most once
    assert!(wait_until(Duration::from_secs(2), || served.load(Ordering::SeqCst) >= 400).await);
    assert!(served.load(Ordering::SeqCst) <= 800);
    assert!(
        wait_until(Duration::from_secs(2), || pool.spawned_workers() == 0).await,
        "workers stranded: {:?}",
        pool.shard_metrics()
    );
}

#[tokio::test]
async fn test_idle_worker_is_reused() {
    let pool = WorkerPool::with_config(|_: u8| async {}, config(1, 1_000));
    pool.start();

    for task in 0..20 {
        pool.add_task(task).await.unwrap();
        assert!(wait_until(Duration::from_secs(1), || pool.metrics().idle_workers == 1).await);
    }
    assert_eq!(pool.spawned_workers(), 1);
}

#[tokio::test]
async fn test_pool_as_task_dispatcher() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let pool = WorkerPool::with_config(
        move |n: u32| {
            let record = Arc::clone(&record);
            async move {
                record.lock().unwrap().push(n);
            }
        },
        config(3, 1_000),
    );
    pool.start();

    let dispatcher: &dyn TaskDispatcher<u32> = &pool;
    assert_eq!(dispatcher.partitions(), 3);
    dispatcher.dispatch(1).await.unwrap();
    dispatcher.dispatch_to(2, 4).await.unwrap();

    assert!(wait_until(Duration::from_secs(1), || seen.lock().unwrap().len() == 2).await);
    assert!(dispatcher.spawned_workers() >= 1);
}
