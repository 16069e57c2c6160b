//! Per-target polling behavior.
//!
//! One gear per target, driving a two-state machine over a [`TargetWatch`]
//! context:
//!
//! - `"ping"` polls the status document every tick, reports player joins and
//!   leaves, and tolerates a few consecutive network failures before giving
//!   the target up as down
//! - `"await_restart"` announces the lost connection and probes with a bare
//!   latency ping every few ticks until the target answers again

use async_trait::async_trait;
use serde_json::Value;
use statuswatch_core::protocol::forge;
use statuswatch_core::{
    Notifier, PollConfig, Result, Server, State, StateMachine, StateTimer, Transition,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const PING_STATE: &str = "ping";
pub const AWAIT_RESTART_STATE: &str = "await_restart";

/// Placeholder for players the server counts but does not name.
const ANONYMOUS_PLAYER: &str = "Anonymous Player";

/// Shared context for one monitored target.
pub struct TargetWatch {
    pub target: String,
    pub server: Server,
    notifier: Arc<dyn Notifier>,
    retries: u32,
    pub last_document: Option<Value>,
    pub last_latency: Option<f64>,
    last_roster: Option<Vec<String>>,
    last_online: Option<u64>,
}

impl TargetWatch {
    pub fn new(
        target: impl Into<String>,
        server: Server,
        notifier: Arc<dyn Notifier>,
        retries: u32,
    ) -> Self {
        Self {
            target: target.into(),
            server,
            notifier,
            retries,
            last_document: None,
            last_latency: None,
            last_roster: None,
            last_online: None,
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(err) = self.notifier.send(text).await {
            warn!(watch = %self.target, error = %err, "notifier failed");
        }
    }
}

/// Named players, padded with anonymous entries up to the online count.
/// None when the server publishes no sample at all.
fn roster(document: &Value) -> Option<Vec<String>> {
    let sample = document.get("players")?.get("sample")?.as_array()?;
    let mut names: Vec<String> = sample
        .iter()
        .filter_map(|entry| entry.get("name").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    if let Some(online) = online_count(document) {
        while (names.len() as u64) < online {
            names.push(ANONYMOUS_PLAYER.to_string());
        }
    }
    Some(names)
}

fn online_count(document: &Value) -> Option<u64> {
    document.get("players")?.get("online")?.as_u64()
}

/// Who joined and who left between two rosters, duplicates counted.
fn roster_diff(old: &[String], new: &[String]) -> (Vec<String>, Vec<String>) {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for name in new {
        *counts.entry(name).or_default() += 1;
    }
    for name in old {
        *counts.entry(name).or_default() -= 1;
    }

    let mut joined = Vec::new();
    let mut left = Vec::new();
    for (name, count) in counts {
        for _ in 0..count.abs() {
            if count > 0 {
                joined.push(name.to_string());
            } else {
                left.push(name.to_string());
            }
        }
    }
    joined.sort();
    left.sort();
    (joined, left)
}

/// Normal operation: poll the status document every tick.
struct PingState {
    fail_threshold: u32,
    failures: u32,
    failed: bool,
    failure_message: Option<String>,
}

impl PingState {
    fn new(fail_threshold: u32) -> Self {
        Self {
            fail_threshold: fail_threshold.max(1),
            failures: 0,
            failed: false,
            failure_message: None,
        }
    }
}

#[async_trait]
impl State<TargetWatch> for PingState {
    fn name(&self) -> &str {
        PING_STATE
    }

    async fn entry_actions(&mut self, ctx: &mut TargetWatch) {
        self.failures = 0;
        self.failed = false;
        self.failure_message = None;
        // stale deltas across an outage would report everyone as joined
        ctx.last_roster = None;
        ctx.last_online = None;
    }

    async fn do_actions(&mut self, ctx: &mut TargetWatch) {
        match ctx.server.status(ctx.retries).await {
            Ok((document, latency)) => {
                self.failures = 0;
                let document = forge::process_response(document);
                self.report_changes(ctx, &document).await;
                ctx.last_roster = roster(&document);
                ctx.last_online = online_count(&document);
                ctx.last_latency = Some(latency);
                ctx.last_document = Some(document);
            }
            Err(err) if err.is_network() => {
                self.failures += 1;
                debug!(
                    watch = %ctx.target,
                    failures = self.failures,
                    error = %err,
                    "status poll failed"
                );
                if self.failures >= self.fail_threshold {
                    self.failed = true;
                    self.failure_message =
                        Some(format!("Lost connection to {}: {err}", ctx.target));
                }
            }
            Err(err) => {
                error!(watch = %ctx.target, error = %err, "unexpected poll failure");
                self.failed = true;
                self.failure_message =
                    Some(format!("Polling {} failed unexpectedly: {err}", ctx.target));
            }
        }
    }

    async fn check_conditions(&mut self, _ctx: &mut TargetWatch) -> Transition {
        if self.failed {
            Transition::To(AWAIT_RESTART_STATE.to_string())
        } else {
            Transition::Stay
        }
    }

    async fn exit_actions(&mut self, ctx: &mut TargetWatch) {
        if let Some(message) = self.failure_message.take() {
            ctx.notify(&message).await;
        }
    }
}

impl PingState {
    async fn report_changes(&self, ctx: &TargetWatch, document: &Value) {
        match (&ctx.last_roster, roster(document)) {
            (Some(old), Some(new)) => {
                let (joined, left) = roster_diff(old, &new);
                let mut parts = Vec::new();
                if !joined.is_empty() {
                    parts.push(format!("{} joined", joined.join(", ")));
                }
                if !left.is_empty() {
                    parts.push(format!("{} left", left.join(", ")));
                }
                if !parts.is_empty() {
                    ctx.notify(&format!("{}: {}", ctx.target, parts.join("; "))).await;
                }
            }
            _ => {
                // no sample published, fall back to the raw count
                if let (Some(old), Some(new)) = (ctx.last_online, online_count(document)) {
                    if old != new {
                        ctx.notify(&format!(
                            "{}: player count changed from {old} to {new}",
                            ctx.target
                        ))
                        .await;
                    }
                }
            }
        }
    }
}

/// Outage handling: probe every few ticks until the target answers.
struct AwaitRestartState {
    wait_ticks: u32,
    ticks: u32,
    restored_latency: Option<f64>,
}

impl AwaitRestartState {
    fn new(wait_ticks: u32) -> Self {
        Self {
            wait_ticks: wait_ticks.max(1),
            ticks: 0,
            restored_latency: None,
        }
    }
}

#[async_trait]
impl State<TargetWatch> for AwaitRestartState {
    fn name(&self) -> &str {
        AWAIT_RESTART_STATE
    }

    async fn entry_actions(&mut self, ctx: &mut TargetWatch) {
        self.ticks = 0;
        self.restored_latency = None;
        let message = match ctx.last_latency {
            Some(latency) => format!(
                "Connection to {} lost (last latency {latency:.0} ms), waiting for restart",
                ctx.target
            ),
            None => format!("Connection to {} lost, waiting for restart", ctx.target),
        };
        ctx.notify(&message).await;
    }

    async fn do_actions(&mut self, ctx: &mut TargetWatch) {
        self.ticks = (self.ticks + 1) % self.wait_ticks;
        if self.ticks != 0 {
            return;
        }
        match ctx.server.ping(ctx.retries).await {
            Ok(latency) => self.restored_latency = Some(latency),
            Err(err) => debug!(watch = %ctx.target, error = %err, "restart probe failed"),
        }
    }

    async fn check_conditions(&mut self, _ctx: &mut TargetWatch) -> Transition {
        if self.restored_latency.is_some() {
            Transition::To(PING_STATE.to_string())
        } else {
            Transition::Stay
        }
    }

    async fn exit_actions(&mut self, ctx: &mut TargetWatch) {
        let message = match self.restored_latency.take() {
            Some(latency) => format!(
                "Connection to {} re-established ({latency:.0} ms)",
                ctx.target
            ),
            None => format!("Connection to {} could not be re-established", ctx.target),
        };
        ctx.notify(&message).await;
    }
}

/// Resolve a target and assemble its polling gear.
pub async fn build_target_gear(
    name: &str,
    address: &str,
    poll: &PollConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<StateTimer<TargetWatch>> {
    let server = match Server::lookup(address).await {
        Ok(server) => server
            .with_timeout(Duration::from_secs(poll.timeout_secs))
            .with_protocol_version(poll.protocol_version),
        Err(err) => {
            let text = format!("Could not resolve {name} ({address}): {err}");
            if let Err(send_err) = notifier.send(&text).await {
                warn!(watch = %name, error = %send_err, "notifier failed");
            }
            return Err(err);
        }
    };

    let context = TargetWatch::new(name, server, notifier, poll.retries);
    let mut machine = StateMachine::new();
    machine.add_state(Box::new(PingState::new(poll.fail_threshold)))?;
    machine.add_state(Box::new(AwaitRestartState::new(poll.wait_ticks)))?;
    StateTimer::new(
        name,
        machine,
        context,
        PING_STATE,
        Duration::from_secs(poll.interval_secs),
    )
}
