//! Named states with lifecycle hooks
//!
//! A [`StateMachine`] owns a set of named [`State`]s and at most one active
//! state. Each hook receives a `&mut C` context: the shared data states read
//! and write instead of reaching back into their owner.
//!
//! `think` runs one tick: the active state's work, then its transition
//! check. At most one transition happens per tick, so a state always gets at
//! least one full tick before its successor runs.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a transition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Keep the current state.
    Stay,
    /// Switch to the named state, running exit and entry hooks.
    To(String),
    /// Clear the active state without running any hooks.
    Stop,
}

/// One named unit of behavior. All hooks default to no-ops.
#[async_trait]
pub trait State<C: Send>: Send {
    fn name(&self) -> &str;

    /// Runs once when the state becomes active.
    async fn entry_actions(&mut self, _ctx: &mut C) {}

    /// Runs every tick while active, before the transition check.
    async fn do_actions(&mut self, _ctx: &mut C) {}

    /// Decides whether to stay, switch, or stop.
    async fn check_conditions(&mut self, _ctx: &mut C) -> Transition {
        Transition::Stay
    }

    /// Runs once when the state is switched away from.
    async fn exit_actions(&mut self, _ctx: &mut C) {}
}

/// Name-keyed state collection with one active state.
pub struct StateMachine<C: Send> {
    states: HashMap<String, Box<dyn State<C>>>,
    active: Option<String>,
}

impl<C: Send> Default for StateMachine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send> StateMachine<C> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            active: None,
        }
    }

    /// Register a state under its own name.
    pub fn add_state(&mut self, state: Box<dyn State<C>>) -> Result<()> {
        let name = state.name().to_string();
        if self.states.contains_key(&name) {
            return Err(Error::state_machine(format!(
                "state {name:?} is already registered"
            )));
        }
        self.states.insert(name, state);
        Ok(())
    }

    pub fn active_state(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Drop the active pointer without running hooks.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Switch to the named state: exit hook on the current state (if any),
    /// swap, entry hook on the new one.
    pub async fn set_state(&mut self, name: &str, ctx: &mut C) -> Result<()> {
        if !self.states.contains_key(name) {
            return Err(Error::state_machine(format!("unknown state {name:?}")));
        }
        if let Some(current) = self.active.take() {
            if let Some(state) = self.states.get_mut(&current) {
                state.exit_actions(ctx).await;
            }
        }
        debug!(state = name, "entering state");
        self.active = Some(name.to_string());
        if let Some(state) = self.states.get_mut(name) {
            state.entry_actions(ctx).await;
        }
        Ok(())
    }

    /// Run one tick of the active state. A no-op when nothing is active.
    pub async fn think(&mut self, ctx: &mut C) -> Result<()> {
        let Some(active) = self.active.clone() else {
            return Ok(());
        };
        let state = self
            .states
            .get_mut(&active)
            .ok_or_else(|| Error::state_machine(format!("active state {active:?} vanished")))?;
        state.do_actions(ctx).await;
        match state.check_conditions(ctx).await {
            Transition::Stay => Ok(()),
            Transition::To(next) => self.set_state(&next, ctx).await,
            Transition::Stop => {
                self.active = None;
                Ok(())
            }
        }
    }
}
