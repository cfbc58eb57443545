//! Transition logic of the reaction state machine.
//!
//! [`ReactionMachine`] is plain synchronous code: every operation takes the
//! current time explicitly, so it can be driven by the runner's `select!`
//! loop or stepped by hand in tests.

use tokio::time::{Duration, Instant};

use crate::platform::NormalizedPlatformEvent;
use crate::triggers::{RegistryError, RuleUpdate, StateDefinition, TriggerRegistry};

use super::state::{MachineState, PoseSnapshot, Reversion};

pub struct ReactionMachine {
    registry: TriggerRegistry,
    state: MachineState,
}

impl ReactionMachine {
    pub fn new(registry: TriggerRegistry) -> Self {
        let state = MachineState::new(registry.default_key());
        Self { registry, state }
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Snapshot of the displayed pose.
    ///
    /// Falls back to the default state if the current key has vanished from
    /// the catalog, which cannot happen through the public API.
    pub fn snapshot(&self) -> PoseSnapshot {
        let definition = self
            .registry
            .get(&self.state.current_state_key)
            .or_else(|_| self.registry.get(self.registry.default_key()));
        match definition {
            Ok(def) => PoseSnapshot::of(def, self.state.is_speaking),
            Err(_) => PoseSnapshot {
                state_key: self.state.current_state_key.clone(),
                label: self.state.current_state_key.clone(),
                pose: crate::triggers::Pose::new(""),
                is_speaking: self.state.is_speaking,
            },
        }
    }

    /// Apply one platform event.
    pub fn handle_event(&mut self, event: &NormalizedPlatformEvent, now: Instant) {
        match event {
            NormalizedPlatformEvent::Disconnect => {
                log::info!("reactor: disconnect; reverting to default");
                self.revert();
            }
            NormalizedPlatformEvent::Error { message } => {
                log::warn!("reactor: platform error: {message}");
            }
            NormalizedPlatformEvent::ChatMessage { user, message } => {
                if let Some(key) = self.registry.find_by_command(message) {
                    let key = key.to_string();
                    log::info!("reactor: chat command from {user} → {key}");
                    self.enter(&key, now);
                }
            }
            other => {
                let Some(event_type) = other.event_type() else {
                    return;
                };
                match self.registry.find_by_event(event_type) {
                    Some(key) => {
                        let key = key.to_string();
                        log::info!("reactor: {event_type} → {key}");
                        self.enter(&key, now);
                    }
                    None => log::debug!("reactor: no state bound to {event_type}"),
                }
            }
        }
    }

    /// Flip the speaking flag.  Never touches the logical state.
    pub fn set_speaking(&mut self, speaking: bool) -> bool {
        if self.state.is_speaking == speaking {
            return false;
        }
        self.state.is_speaking = speaking;
        true
    }

    /// Host-driven preview of a state through the timed-transition procedure.
    pub fn select(&mut self, key: &str, now: Instant) -> Result<(), RegistryError> {
        self.registry.get(key)?;
        self.enter(key, now);
        Ok(())
    }

    /// Pending reversion deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.deadline()
    }

    /// Fire the reversion timer if its deadline has passed.
    pub fn revert_if_due(&mut self, now: Instant) -> bool {
        match self.state.reversion {
            Some(Reversion { deadline }) if deadline <= now => {
                log::debug!(
                    "reactor: {} timed out; reverting to default",
                    self.state.current_state_key
                );
                self.revert();
                true
            }
            _ => false,
        }
    }

    pub fn trigger_rule(&self, key: &str) -> Result<StateDefinition, RegistryError> {
        self.registry.get(key).cloned()
    }

    /// Pending timers keep the deadline they were armed with.
    pub fn update_trigger_rule(
        &mut self,
        key: &str,
        update: RuleUpdate,
    ) -> Result<StateDefinition, RegistryError> {
        match self.registry.update(key, update) {
            Ok(def) => {
                log::info!("reactor: updated trigger rule for {key}");
                Ok(def)
            }
            Err(e) => {
                log::warn!("reactor: rule update for {key} rejected: {e}");
                Err(e)
            }
        }
    }

    pub fn definitions(&self) -> Vec<StateDefinition> {
        self.registry.definitions().to_vec()
    }

    fn enter(&mut self, key: &str, now: Instant) {
        let timeout = match self.registry.get(key) {
            Ok(def) if def.is_default() => {
                self.revert();
                return;
            }
            Ok(def) => def.rule.reversion_timeout_secs,
            Err(e) => {
                log::warn!("reactor: {e}");
                return;
            }
        };
        self.state.current_state_key = key.to_string();
        self.state.reversion = Some(Reversion {
            deadline: now + Duration::from_secs(timeout),
        });
    }

    fn revert(&mut self) {
        self.state.current_state_key = self.registry.default_key().to_string();
        self.state.reversion = None;
    }
}
