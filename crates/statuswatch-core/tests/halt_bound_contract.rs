//! Halt latency bound for state-driven gears.
//!
//! Contract: halting a state timer completes within 1.5 × its delay even
//! when the current tick never yields, via the forced-cancel path.

use async_trait::async_trait;
use statuswatch_core::{Registry, State, StateMachine, StateTimer, Transition};
use std::time::{Duration, Instant};

struct Stall;

#[async_trait]
impl State<()> for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    async fn do_actions(&mut self, _ctx: &mut ()) {
        std::future::pending::<()>().await;
    }
}

struct Idle;

#[async_trait]
impl State<()> for Idle {
    fn name(&self) -> &str {
        "idle"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stuck_tick_still_halts_within_bound() {
    let mut machine = StateMachine::new();
    machine.add_state(Box::new(Stall)).unwrap();
    let gear =
        StateTimer::new("staller", machine, (), "stall", Duration::from_secs(1)).unwrap();

    let mut registry = Registry::new();
    registry.add_gear(Box::new(gear)).unwrap();
    registry.mark_ready();
    // let the first tick start and get stuck
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    registry.close().await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_millis(1500),
        "halt took {elapsed:?}"
    );
    assert_eq!(registry.gear_count(), 0);
}

#[tokio::test]
async fn idle_gear_halts_promptly_and_runs_exit_path() {
    let mut machine = StateMachine::new();
    machine.add_state(Box::new(Idle)).unwrap();
    let gear = StateTimer::new("idler", machine, (), "idle", Duration::from_secs(5)).unwrap();

    let mut registry = Registry::new();
    registry.add_gear(Box::new(gear)).unwrap();
    registry.mark_ready();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    registry.close().await.unwrap();

    // the gear was sleeping between ticks, so only a sleep slice passes
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(registry.gear_count(), 0);
}

#[tokio::test]
async fn machine_stop_transition_stops_the_gear() {
    struct OneShot;

    #[async_trait]
    impl State<()> for OneShot {
        fn name(&self) -> &str {
            "one_shot"
        }

        async fn check_conditions(&mut self, _ctx: &mut ()) -> Transition {
            Transition::Stop
        }
    }

    let mut machine = StateMachine::new();
    machine.add_state(Box::new(OneShot)).unwrap();
    let gear =
        StateTimer::new("one_shot", machine, (), "one_shot", Duration::from_millis(20)).unwrap();

    let mut registry = Registry::new();
    registry.add_gear(Box::new(gear)).unwrap();
    registry.mark_ready();

    // first tick enters and stops the machine; second tick reports stop
    tokio::time::sleep(Duration::from_millis(300)).await;
    let gear = registry.get_gear("one_shot").unwrap();
    assert!(gear.stopped());

    registry.close().await.unwrap();
    assert_eq!(registry.gear_count(), 0);
}
