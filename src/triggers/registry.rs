//! The trigger table and its mutation rules.
//!
//! [`TriggerRegistry`] owns every [`StateDefinition`] in catalog order.
//! Entries are never added or removed at runtime; [`TriggerRegistry::update`]
//! is the only way to change one, and it enforces that no two non-default
//! states bind the same [`PlatformEventType`].

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::rule::{PlatformEventType, RuleUpdate, StateDefinition, DEFAULT_STATE_KEY};

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No state with this key exists in the catalog.
    #[error("unknown state key: {key}")]
    NotFound { key: String },

    /// Another state already binds the requested event.
    #[error("event \"{event}\" is already bound to state \"{occupied_by}\"")]
    Conflict {
        event: PlatformEventType,
        occupied_by: String,
    },

    /// Reversion timeouts must be at least one second.
    #[error("state \"{key}\": timeout must be a positive number of seconds")]
    InvalidTimeout { key: String },

    /// A host-supplied catalog repeats a key.
    #[error("state key \"{key}\" appears more than once")]
    DuplicateKey { key: String },

    /// Event bindings on the fallback state are never consulted.
    #[error("the \"default\" state cannot bind a platform event")]
    DefaultEventBinding,

    /// A host-supplied catalog has no `default` entry.
    #[error("catalog has no \"default\" state")]
    MissingDefault,
}

// ---------------------------------------------------------------------------
// SubscriptionControl
// ---------------------------------------------------------------------------

/// Boundary hook the registry signals when an event binding is dropped or
/// added.
///
/// Calls must not block; implementations queue the work and log failures.
pub trait SubscriptionControl: Send + Sync {
    fn unsubscribe(&self, event: PlatformEventType);
    fn resubscribe(&self, event: PlatformEventType);
}

// ---------------------------------------------------------------------------
// TriggerRegistry
// ---------------------------------------------------------------------------

pub struct TriggerRegistry {
    definitions: Vec<StateDefinition>,
    subscriptions: Option<Arc<dyn SubscriptionControl>>,
}

impl TriggerRegistry {
    /// Build a registry from a catalog, validating keys and bindings.
    pub fn from_definitions(definitions: Vec<StateDefinition>) -> Result<Self, RegistryError> {
        let mut keys = HashSet::new();
        for def in &definitions {
            if !keys.insert(def.key.as_str()) {
                return Err(RegistryError::DuplicateKey {
                    key: def.key.clone(),
                });
            }
            if def.rule.reversion_timeout_secs == 0 {
                return Err(RegistryError::InvalidTimeout {
                    key: def.key.clone(),
                });
            }
        }
        if !keys.contains(DEFAULT_STATE_KEY) {
            return Err(RegistryError::MissingDefault);
        }

        let mut bound: Vec<(PlatformEventType, &str)> = Vec::new();
        for def in definitions.iter().filter(|d| !d.is_default()) {
            let Some(event) = def.rule.platform_event_type else {
                continue;
            };
            if let Some((_, owner)) = bound.iter().find(|(e, _)| *e == event) {
                return Err(RegistryError::Conflict {
                    event,
                    occupied_by: owner.to_string(),
                });
            }
            bound.push((event, def.key.as_str()));
        }

        Ok(Self {
            definitions,
            subscriptions: None,
        })
    }

    /// Attach the boundary that receives unsubscribe / resubscribe signals.
    pub fn with_subscription_control(mut self, control: Arc<dyn SubscriptionControl>) -> Self {
        self.subscriptions = Some(control);
        self
    }

    pub fn default_key(&self) -> &str {
        DEFAULT_STATE_KEY
    }

    /// All definitions in catalog order.
    pub fn definitions(&self) -> &[StateDefinition] {
        &self.definitions
    }

    pub fn get(&self, key: &str) -> Result<&StateDefinition, RegistryError> {
        self.definitions
            .iter()
            .find(|d| d.key == key)
            .ok_or_else(|| RegistryError::NotFound {
                key: key.to_string(),
            })
    }

    /// Apply a partial update to one state's label and trigger rule.
    ///
    /// No field changes unless the whole update is valid.
    pub fn update(
        &mut self,
        key: &str,
        update: RuleUpdate,
    ) -> Result<StateDefinition, RegistryError> {
        let index = self
            .definitions
            .iter()
            .position(|d| d.key == key)
            .ok_or_else(|| RegistryError::NotFound {
                key: key.to_string(),
            })?;

        if update.timeout_secs == Some(0) {
            return Err(RegistryError::InvalidTimeout {
                key: key.to_string(),
            });
        }

        let is_default = self.definitions[index].is_default();
        let previous_event = self.definitions[index].rule.platform_event_type;
        let next_event = match update.event {
            Some(event) => event,
            None => previous_event,
        };

        if is_default && next_event.is_some() && next_event != previous_event {
            return Err(RegistryError::DefaultEventBinding);
        }

        if let Some(event) = next_event.filter(|_| !is_default) {
            if let Some(owner) = self
                .definitions
                .iter()
                .filter(|d| d.key != key && !d.is_default())
                .find(|d| d.rule.platform_event_type == Some(event))
            {
                return Err(RegistryError::Conflict {
                    event,
                    occupied_by: owner.key.clone(),
                });
            }
        }

        if previous_event != next_event && !is_default {
            if let Some(control) = &self.subscriptions {
                if let Some(old) = previous_event {
                    if next_event.is_none() {
                        log::info!("registry: state {key} released {old}; unsubscribing");
                        control.unsubscribe(old);
                    }
                }
                if let Some(new) = next_event {
                    control.resubscribe(new);
                }
            }
        }

        let def = &mut self.definitions[index];
        if let Some(label) = update.label {
            def.label = label;
        }
        if let Some(command) = update.command {
            def.rule.chat_command = command.filter(|c| !c.trim().is_empty());
        }
        def.rule.platform_event_type = next_event;
        if let Some(secs) = update.timeout_secs {
            def.rule.reversion_timeout_secs = secs;
        }

        Ok(def.clone())
    }

    /// First non-default state, in catalog order, bound to `event`.
    pub fn find_by_event(&self, event: PlatformEventType) -> Option<&str> {
        self.definitions
            .iter()
            .filter(|d| !d.is_default())
            .find(|d| d.rule.platform_event_type == Some(event))
            .map(|d| d.key.as_str())
    }

    /// First non-default state, in catalog order, whose chat command occurs
    /// in `text` (case-insensitive).
    pub fn find_by_command(&self, text: &str) -> Option<&str> {
        self.definitions
            .iter()
            .filter(|d| !d.is_default())
            .find(|d| d.rule.matches_chat(text))
            .map(|d| d.key.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::catalog::default_catalog;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<(&'static str, PlatformEventType)>>,
    }

    impl SubscriptionControl for RecordingControl {
        fn unsubscribe(&self, event: PlatformEventType) {
            self.calls.lock().unwrap().push(("unsubscribe", event));
        }

        fn resubscribe(&self, event: PlatformEventType) {
            self.calls.lock().unwrap().push(("resubscribe", event));
        }
    }

    fn registry() -> TriggerRegistry {
        TriggerRegistry::from_definitions(default_catalog()).expect("catalog is valid")
    }

    fn with_bits2() -> TriggerRegistry {
        let mut catalog = default_catalog();
        catalog.push(StateDefinition::new("bits2", "Bits 2", "b2.png", "b2_talk.png"));
        TriggerRegistry::from_definitions(catalog).expect("catalog is valid")
    }

    #[test]
    fn get_unknown_key_is_not_found() {
        let reg = registry();
        assert_eq!(
            reg.get("nope").unwrap_err(),
            RegistryError::NotFound { key: "nope".into() }
        );
    }

    #[test]
    fn find_by_event_returns_bound_state() {
        let reg = registry();
        assert_eq!(reg.find_by_event(PlatformEventType::Follow), Some("follow"));
        assert_eq!(reg.find_by_event(PlatformEventType::Bits), Some("bits"));
        assert_eq!(reg.find_by_event(PlatformEventType::Raid), None);
    }

    #[test]
    fn find_by_command_matches_substring() {
        let reg = registry();
        assert_eq!(reg.find_by_command("hey !payaso now"), Some("clown"));
        assert_eq!(reg.find_by_command("HEY !PAYASO"), Some("clown"));
        assert_eq!(reg.find_by_command("no command here"), None);
    }

    #[test]
    fn find_by_command_uses_catalog_order() {
        let reg = registry();
        // Both "!seguidor" (follow) and "!payaso" (clown) occur; follow comes first.
        assert_eq!(reg.find_by_command("!payaso !seguidor"), Some("follow"));
    }

    #[test]
    fn second_binding_to_same_event_is_rejected() {
        let mut reg = with_bits2();
        let before = reg.get("bits2").unwrap().clone();

        let err = reg
            .update("bits2", RuleUpdate::default().event(Some(PlatformEventType::Bits)))
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::Conflict {
                event: PlatformEventType::Bits,
                occupied_by: "bits".into(),
            }
        );
        assert_eq!(reg.get("bits2").unwrap(), &before);
    }

    #[test]
    fn conflicting_update_applies_no_fields() {
        let mut reg = with_bits2();
        let _ = reg.update(
            "bits2",
            RuleUpdate::default()
                .label("Renamed")
                .timeout_secs(3)
                .event(Some(PlatformEventType::Bits)),
        );
        let def = reg.get("bits2").unwrap();
        assert_eq!(def.label, "Bits 2");
        assert_eq!(def.rule.reversion_timeout_secs, 15);
    }

    #[test]
    fn rebinding_own_event_is_not_a_conflict() {
        let mut reg = registry();
        let def = reg
            .update(
                "follow",
                RuleUpdate::default().event(Some(PlatformEventType::Follow)),
            )
            .expect("own binding");
        assert_eq!(def.rule.platform_event_type, Some(PlatformEventType::Follow));
    }

    #[test]
    fn partial_update_keeps_omitted_fields() {
        let mut reg = registry();
        let def = reg
            .update("follow", RuleUpdate::default().timeout_secs(5))
            .expect("update");
        assert_eq!(def.rule.reversion_timeout_secs, 5);
        assert_eq!(def.label, "Nuevo seguidor");
        assert_eq!(def.rule.chat_command.as_deref(), Some("!seguidor"));
        assert_eq!(def.rule.platform_event_type, Some(PlatformEventType::Follow));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut reg = registry();
        let err = reg
            .update("follow", RuleUpdate::default().timeout_secs(0))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTimeout { .. }));
        assert_eq!(reg.get("follow").unwrap().rule.reversion_timeout_secs, 15);
    }

    #[test]
    fn clearing_event_signals_unsubscribe() {
        let control = Arc::new(RecordingControl::default());
        let mut reg = registry().with_subscription_control(control.clone());

        reg.update("follow", RuleUpdate::default().event(None))
            .expect("clear");

        assert_eq!(
            *control.calls.lock().unwrap(),
            vec![("unsubscribe", PlatformEventType::Follow)]
        );
        assert_eq!(reg.find_by_event(PlatformEventType::Follow), None);
    }

    #[test]
    fn released_event_can_be_claimed_by_another_state() {
        let control = Arc::new(RecordingControl::default());
        let mut reg = with_bits2().with_subscription_control(control.clone());

        reg.update("bits", RuleUpdate::default().event(None)).expect("release");
        reg.update("bits2", RuleUpdate::default().event(Some(PlatformEventType::Bits)))
            .expect("claim");

        assert_eq!(reg.find_by_event(PlatformEventType::Bits), Some("bits2"));
        assert_eq!(
            *control.calls.lock().unwrap(),
            vec![
                ("unsubscribe", PlatformEventType::Bits),
                ("resubscribe", PlatformEventType::Bits),
            ]
        );
    }

    #[test]
    fn conflict_sends_no_subscription_signal() {
        let control = Arc::new(RecordingControl::default());
        let mut reg = with_bits2().with_subscription_control(control.clone());
        let _ = reg.update("bits2", RuleUpdate::default().event(Some(PlatformEventType::Bits)));
        assert!(control.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn default_state_is_never_matched() {
        let mut catalog = default_catalog();
        catalog[0].rule.chat_command = Some("!reset".into());
        catalog[0].rule.platform_event_type = Some(PlatformEventType::Raid);
        let reg = TriggerRegistry::from_definitions(catalog).expect("valid");

        assert_eq!(reg.find_by_command("!reset"), None);
        assert_eq!(reg.find_by_event(PlatformEventType::Raid), None);
    }

    #[test]
    fn default_state_rejects_event_binding() {
        let mut reg = registry();
        let before = reg.get("default").unwrap().clone();

        for event in [PlatformEventType::Follow, PlatformEventType::Raid] {
            let err = reg
                .update("default", RuleUpdate::default().event(Some(event)).label("X"))
                .unwrap_err();
            assert_eq!(err, RegistryError::DefaultEventBinding);
        }
        assert_eq!(reg.get("default").unwrap(), &before);

        // Label and timeout edits still go through.
        let updated = reg
            .update("default", RuleUpdate::default().event(None).label("Idle"))
            .unwrap();
        assert_eq!(updated.label, "Idle");
        assert_eq!(updated.rule.platform_event_type, None);
    }

    #[test]
    fn catalog_default_event_is_inert_on_update() {
        let mut catalog = default_catalog();
        catalog[0].rule.platform_event_type = Some(PlatformEventType::Follow);
        let mut reg = TriggerRegistry::from_definitions(catalog).expect("valid");

        // "follow" also binds Follow; the default's copy is not a conflict.
        let updated = reg
            .update(
                "default",
                RuleUpdate::default()
                    .event(Some(PlatformEventType::Follow))
                    .timeout_secs(5),
            )
            .unwrap();
        assert_eq!(updated.rule.reversion_timeout_secs, 5);
        assert_eq!(reg.find_by_event(PlatformEventType::Follow), Some("follow"));
    }

    #[test]
    fn catalog_with_duplicate_event_is_rejected() {
        let mut catalog = default_catalog();
        catalog.push(
            StateDefinition::new("follow2", "F2", "a.png", "b.png")
                .with_event(PlatformEventType::Follow),
        );
        assert_eq!(
            TriggerRegistry::from_definitions(catalog).err(),
            Some(RegistryError::Conflict {
                event: PlatformEventType::Follow,
                occupied_by: "follow".into(),
            })
        );
    }

    #[test]
    fn catalog_without_default_is_rejected() {
        let catalog: Vec<_> = default_catalog().into_iter().skip(1).collect();
        assert_eq!(
            TriggerRegistry::from_definitions(catalog).err(),
            Some(RegistryError::MissingDefault)
        );
    }

    #[test]
    fn catalog_with_duplicate_key_is_rejected() {
        let mut catalog = default_catalog();
        catalog.push(StateDefinition::new("clown", "Again", "a.png", "b.png"));
        assert!(matches!(
            TriggerRegistry::from_definitions(catalog),
            Err(RegistryError::DuplicateKey { .. })
        ));
    }
}
