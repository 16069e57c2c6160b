//! Recurring background tasks with bounded shutdown
//!
//! A [`Gear`] is a named background worker owned by a [`Registry`]. Gears do
//! not start working until the registry is marked ready, and the registry's
//! `close()` halts every gear concurrently with a predictable latency bound.
//!
//! [`Timer`] runs a [`TimerTick`] on a fixed delay, sleeping in short slices
//! so a halt is noticed within ~100 ms even mid-wait. [`StateTimer`] drives a
//! [`StateMachine`] from a timer tick, with a pre-registered terminal state
//! that lets `halt()` run the active state's exit actions before stopping.

use crate::error::{Error, Result};
use crate::machine::{State, StateMachine, Transition};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, warn};

/// Slice length for interruptible sleeps and forced-cancel join waits.
const SLEEP_SLICE_MS: u64 = 100;

/// Name of the terminal state every [`StateTimer`] pre-registers.
pub const HALT_STATE: &str = "halt";

/// Shared start/stop signals between a registry and its gears.
#[derive(Debug)]
pub struct RegistrySignals {
    ready: watch::Sender<bool>,
    closing: AtomicBool,
}

impl RegistrySignals {
    fn new() -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            ready,
            closing: AtomicBool::new(false),
        })
    }

    /// Release all gears waiting to start.
    pub fn mark_ready(&self) {
        let _ = self.ready.send(true);
    }

    /// Suspend until the registry is marked ready. Returns immediately if it
    /// already was.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Raise the one-way closing flag.
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Lifecycle flags shared between a gear handle and its background task.
/// `stopped` is a one-way latch; the two flags are never both true.
#[derive(Debug, Default)]
pub struct GearFlags {
    running: AtomicBool,
    stopped: AtomicBool,
}

impl GearFlags {
    fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A named background worker managed by a [`Registry`].
#[async_trait]
pub trait Gear: Send {
    fn name(&self) -> &str;

    /// True while the background work is actively scheduled.
    fn running(&self) -> bool;

    /// True once the gear has stopped for good.
    fn stopped(&self) -> bool;

    /// Schedule the background work. Must not block; real work starts when
    /// the signals report ready.
    fn gear_init(&mut self, signals: Arc<RegistrySignals>) -> Result<()>;

    /// Stop the background work. Idempotent: a fast no-op when already
    /// stopped.
    async fn halt(&mut self) -> Result<()>;

    /// Final cleanup, called by the registry only after the gear stopped.
    fn gear_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The recurring work a [`Timer`] runs.
#[async_trait]
pub trait TimerTick: Send + 'static {
    /// One unit of work. Return true to stop the timer.
    async fn tick(&mut self) -> bool;

    /// Runs once when the timer loop exits cooperatively.
    async fn on_stop(&mut self) {}
}

/// Runs a [`TimerTick`] immediately and then on a fixed delay.
pub struct Timer<T: TimerTick> {
    name: String,
    tick: Option<T>,
    delay: Arc<AtomicU64>,
    flags: Arc<GearFlags>,
    ticks: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl<T: TimerTick> Timer<T> {
    pub fn new(name: impl Into<String>, tick: T, delay: Duration) -> Self {
        Self::with_shared(
            name,
            tick,
            Arc::new(AtomicU64::new(delay.as_millis() as u64)),
            Arc::new(GearFlags::default()),
        )
    }

    /// Construct with externally shared delay and flags, so a wrapping gear
    /// can observe and adjust them.
    fn with_shared(
        name: impl Into<String>,
        tick: T,
        delay: Arc<AtomicU64>,
        flags: Arc<GearFlags>,
    ) -> Self {
        Self {
            name: name.into(),
            tick: Some(tick),
            delay,
            flags,
            ticks: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Completed tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    async fn run_loop(
        mut tick: T,
        name: String,
        signals: Arc<RegistrySignals>,
        flags: Arc<GearFlags>,
        delay: Arc<AtomicU64>,
        ticks: Arc<AtomicU64>,
    ) {
        signals.wait_until_ready().await;
        if !signals.closing() && !flags.stopped() {
            flags.set_running(true);
            debug!(gear = %name, "timer running");

            'run: loop {
                if !flags.running() || signals.closing() {
                    break 'run;
                }
                let stop = tick.tick().await;
                ticks.fetch_add(1, Ordering::Relaxed);
                if stop {
                    break 'run;
                }

                // Sleep in short slices so halts and close are noticed
                // promptly; re-read the delay each slice since a halt may
                // collapse it to zero.
                let mut slept = 0u64;
                loop {
                    let total = delay.load(Ordering::Relaxed);
                    if slept >= total {
                        break;
                    }
                    if !flags.running() || signals.closing() {
                        break 'run;
                    }
                    let slice = SLEEP_SLICE_MS.min(total - slept);
                    time::sleep(Duration::from_millis(slice)).await;
                    slept += slice;
                }
            }
        }

        flags.mark_stopped();
        tick.on_stop().await;
        debug!(gear = %name, "timer stopped");
    }
}

#[async_trait]
impl<T: TimerTick> Gear for Timer<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn running(&self) -> bool {
        self.flags.running()
    }

    fn stopped(&self) -> bool {
        self.flags.stopped()
    }

    fn gear_init(&mut self, signals: Arc<RegistrySignals>) -> Result<()> {
        let tick = self
            .tick
            .take()
            .ok_or_else(|| Error::registry(format!("gear {:?} already initialized", self.name)))?;
        self.task = Some(tokio::spawn(Self::run_loop(
            tick,
            self.name.clone(),
            signals,
            Arc::clone(&self.flags),
            Arc::clone(&self.delay),
            Arc::clone(&self.ticks),
        )));
        Ok(())
    }

    async fn halt(&mut self) -> Result<()> {
        if self.flags.stopped() {
            return Ok(());
        }
        self.flags.set_running(false);
        if let Some(mut task) = self.task.take() {
            let grace = Duration::from_millis(
                self.delay.load(Ordering::Relaxed).max(SLEEP_SLICE_MS),
            );
            if time::timeout(grace, &mut task).await.is_err() {
                warn!(gear = %self.name, "tick did not yield in time, cancelling");
                task.abort();
                let _ = time::timeout(Duration::from_millis(SLEEP_SLICE_MS), task).await;
            }
        }
        self.flags.mark_stopped();
        Ok(())
    }
}

struct MachineCell<C: Send> {
    machine: StateMachine<C>,
    context: C,
}

/// The tick driving a [`StateTimer`]'s machine.
struct StateTick<C: Send + 'static> {
    name: String,
    cell: Arc<Mutex<MachineCell<C>>>,
    signals: Arc<RegistrySignals>,
    initial: Option<String>,
}

#[async_trait]
impl<C: Send + 'static> TimerTick for StateTick<C> {
    async fn tick(&mut self) -> bool {
        let mut cell = self.cell.lock().await;
        if self.signals.closing() {
            cell.machine.clear_active();
            return true;
        }

        let MachineCell { machine, context } = &mut *cell;
        if let Some(initial) = self.initial.take() {
            if let Err(err) = machine.set_state(&initial, context).await {
                error!(gear = %self.name, error = %err, "initial state rejected");
                return true;
            }
        }
        if let Err(err) = machine.think(context).await {
            error!(gear = %self.name, error = %err, "state machine fault");
            return true;
        }
        machine.active_state().is_none()
    }
}

/// Terminal state: stops the machine on its first transition check.
struct HaltState;

#[async_trait]
impl<C: Send> State<C> for HaltState {
    fn name(&self) -> &str {
        HALT_STATE
    }

    async fn check_conditions(&mut self, _ctx: &mut C) -> Transition {
        Transition::Stop
    }
}

/// A gear that ticks a [`StateMachine`] over a shared context.
///
/// `halt()` first tries, bounded by one delay, to lock the machine and force
/// the terminal state so the active state's exit actions run; it then
/// collapses the delay to zero and stops the underlying timer. Total halt
/// latency stays within 1.5 × delay even when a tick never yields.
pub struct StateTimer<C: Send + 'static> {
    name: String,
    cell: Arc<Mutex<MachineCell<C>>>,
    delay: Arc<AtomicU64>,
    flags: Arc<GearFlags>,
    initial: Option<String>,
    timer: Option<Timer<StateTick<C>>>,
}

impl<C: Send + 'static> StateTimer<C> {
    /// Wrap a machine and its context. Fails if the machine already defines
    /// the terminal state name.
    pub fn new(
        name: impl Into<String>,
        mut machine: StateMachine<C>,
        context: C,
        initial_state: impl Into<String>,
        delay: Duration,
    ) -> Result<Self> {
        machine.add_state(Box::new(HaltState))?;
        Ok(Self {
            name: name.into(),
            cell: Arc::new(Mutex::new(MachineCell { machine, context })),
            delay: Arc::new(AtomicU64::new(delay.as_millis() as u64)),
            flags: Arc::new(GearFlags::default()),
            initial: Some(initial_state.into()),
            timer: None,
        })
    }
}

#[async_trait]
impl<C: Send + 'static> Gear for StateTimer<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn running(&self) -> bool {
        self.flags.running()
    }

    fn stopped(&self) -> bool {
        self.flags.stopped()
    }

    fn gear_init(&mut self, signals: Arc<RegistrySignals>) -> Result<()> {
        if self.timer.is_some() {
            return Err(Error::registry(format!(
                "gear {:?} already initialized",
                self.name
            )));
        }
        let tick = StateTick {
            name: self.name.clone(),
            cell: Arc::clone(&self.cell),
            signals: Arc::clone(&signals),
            initial: self.initial.take(),
        };
        let mut timer = Timer::with_shared(
            self.name.clone(),
            tick,
            Arc::clone(&self.delay),
            Arc::clone(&self.flags),
        );
        timer.gear_init(signals)?;
        self.timer = Some(timer);
        Ok(())
    }

    async fn halt(&mut self) -> Result<()> {
        if self.flags.stopped() {
            return Ok(());
        }

        // Cooperative phase: run the active state's exit actions, but only
        // if the machine frees up within one delay.
        let delay = Duration::from_millis(self.delay.load(Ordering::Relaxed));
        match time::timeout(delay, self.cell.lock()).await {
            Ok(mut cell) => {
                if cell.machine.active_state().is_some_and(|s| s != HALT_STATE) {
                    let MachineCell { machine, context } = &mut *cell;
                    if let Err(err) = machine.set_state(HALT_STATE, context).await {
                        warn!(gear = %self.name, error = %err, "could not enter halt state");
                    }
                }
            }
            Err(_) => {
                warn!(gear = %self.name, "tick holds the machine, skipping exit actions");
            }
        }

        self.delay.store(0, Ordering::Relaxed);
        if let Some(timer) = self.timer.as_mut() {
            timer.halt().await?;
        }
        self.flags.mark_stopped();
        Ok(())
    }
}

/// Name-keyed gear collection with shared lifecycle signals.
pub struct Registry {
    gears: HashMap<String, Box<dyn Gear>>,
    signals: Arc<RegistrySignals>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            gears: HashMap::new(),
            signals: RegistrySignals::new(),
        }
    }

    pub fn signals(&self) -> Arc<RegistrySignals> {
        Arc::clone(&self.signals)
    }

    /// Register and initialize a gear. Names must be unique.
    pub fn add_gear(&mut self, mut gear: Box<dyn Gear>) -> Result<()> {
        let name = gear.name().to_string();
        if self.gears.contains_key(&name) {
            return Err(Error::registry(format!("gear {name:?} already registered")));
        }
        gear.gear_init(Arc::clone(&self.signals))?;
        self.gears.insert(name, gear);
        Ok(())
    }

    /// Remove a stopped gear, running its final cleanup.
    pub fn remove_gear(&mut self, name: &str) -> Result<()> {
        let gear = self
            .gears
            .get_mut(name)
            .ok_or_else(|| Error::registry(format!("no gear named {name:?}")))?;
        if !gear.stopped() {
            return Err(Error::registry(format!(
                "gear {name:?} has not stopped, halt it first"
            )));
        }
        gear.gear_shutdown()?;
        self.gears.remove(name);
        Ok(())
    }

    pub fn get_gear(&self, name: &str) -> Option<&dyn Gear> {
        self.gears.get(name).map(Box::as_ref)
    }

    pub fn gear_count(&self) -> usize {
        self.gears.len()
    }

    /// Release all gears to start working.
    pub fn mark_ready(&self) {
        self.signals.mark_ready();
    }

    pub fn closing(&self) -> bool {
        self.signals.closing()
    }

    /// Halt every gear concurrently, then remove them all. Safe to call
    /// with gears that already stopped on their own.
    pub async fn close(&mut self) -> Result<()> {
        self.signals.mark_closing();

        let halts: Vec<_> = self
            .gears
            .values_mut()
            .filter(|gear| !gear.stopped())
            .map(|gear| gear.halt())
            .collect();
        for result in join_all(halts).await {
            if let Err(err) = result {
                warn!(error = %err, "gear halt failed during close");
            }
        }

        let names: Vec<String> = self.gears.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.remove_gear(&name) {
                warn!(gear = %name, error = %err, "gear removal failed during close");
            }
        }
        Ok(())
    }
}
