//! Registry lifecycle guarantees.
//!
//! Contract: gears do not work before the registry is ready, names are
//! unique, live gears cannot be removed, and `close()` halts everything
//! concurrently and leaves the registry empty.

use async_trait::async_trait;
use statuswatch_core::{Error, Registry, Timer, TimerTick};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

struct CountTick {
    count: Arc<AtomicU32>,
    busy: Duration,
    stop_after: Option<u32>,
}

impl CountTick {
    fn new(count: Arc<AtomicU32>) -> Self {
        Self {
            count,
            busy: Duration::ZERO,
            stop_after: None,
        }
    }
}

#[async_trait]
impl TimerTick for CountTick {
    async fn tick(&mut self) -> bool {
        let done = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.busy.is_zero() {
            tokio::time::sleep(self.busy).await;
        }
        self.stop_after.is_some_and(|n| done >= n)
    }
}

#[tokio::test]
async fn gears_wait_for_ready() {
    let count = Arc::new(AtomicU32::new(0));
    let mut registry = Registry::new();
    registry
        .add_gear(Box::new(Timer::new(
            "waiter",
            CountTick::new(Arc::clone(&count)),
            Duration::from_millis(20),
        )))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    registry.mark_ready();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(count.load(Ordering::SeqCst) > 0);

    registry.close().await.unwrap();
}

#[tokio::test]
async fn duplicate_gear_name_is_rejected() {
    let mut registry = Registry::new();
    registry
        .add_gear(Box::new(Timer::new(
            "poller",
            CountTick::new(Arc::new(AtomicU32::new(0))),
            Duration::from_millis(50),
        )))
        .unwrap();

    let err = registry
        .add_gear(Box::new(Timer::new(
            "poller",
            CountTick::new(Arc::new(AtomicU32::new(0))),
            Duration::from_millis(50),
        )))
        .unwrap_err();
    assert!(matches!(err, Error::Registry(_)));

    registry.close().await.unwrap();
}

#[tokio::test]
async fn live_gear_cannot_be_removed() {
    let mut registry = Registry::new();
    registry
        .add_gear(Box::new(Timer::new(
            "poller",
            CountTick::new(Arc::new(AtomicU32::new(0))),
            Duration::from_millis(50),
        )))
        .unwrap();
    registry.mark_ready();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = registry.remove_gear("poller").unwrap_err();
    assert!(matches!(err, Error::Registry(_)));
    assert_eq!(registry.gear_count(), 1);

    registry.close().await.unwrap();
    assert_eq!(registry.gear_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_halts_gears_concurrently() {
    let mut registry = Registry::new();
    for name in ["one", "two", "three"] {
        let mut tick = CountTick::new(Arc::new(AtomicU32::new(0)));
        tick.busy = Duration::from_millis(300);
        registry
            .add_gear(Box::new(Timer::new(name, tick, Duration::from_millis(500))))
            .unwrap();
    }
    registry.mark_ready();
    // all three are now mid-tick
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    registry.close().await.unwrap();
    let elapsed = started.elapsed();

    // three sequential halts would wait out three busy ticks
    assert!(elapsed < Duration::from_millis(900), "close took {elapsed:?}");
    assert_eq!(registry.gear_count(), 0);
}

#[tokio::test]
async fn close_tolerates_already_stopped_gears() {
    let count = Arc::new(AtomicU32::new(0));
    let mut tick = CountTick::new(Arc::clone(&count));
    tick.stop_after = Some(1);

    let mut registry = Registry::new();
    registry
        .add_gear(Box::new(Timer::new("one_shot", tick, Duration::from_secs(60))))
        .unwrap();
    registry.mark_ready();

    // wait for the self-stop
    for _ in 0..50 {
        if registry.get_gear("one_shot").unwrap().stopped() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registry.get_gear("one_shot").unwrap().stopped());

    registry.close().await.unwrap();
    assert_eq!(registry.gear_count(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
