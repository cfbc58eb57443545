//! Trigger table: which platform events and chat commands activate which
//! avatar states.
//!
//! # Quick start
//!
//! ```rust
//! use reactive_avatar::triggers::{default_catalog, PlatformEventType, RuleUpdate, TriggerRegistry};
//!
//! let mut registry = TriggerRegistry::from_definitions(default_catalog()).unwrap();
//! assert_eq!(registry.find_by_event(PlatformEventType::Follow), Some("follow"));
//! assert_eq!(registry.find_by_command("hey !payaso now"), Some("clown"));
//!
//! // A second binding to the same event is rejected, not overwritten.
//! let err = registry
//!     .update("clown", RuleUpdate::default().event(Some(PlatformEventType::Bits)))
//!     .unwrap_err();
//! println!("{err}");
//! ```

pub mod catalog;
pub mod registry;
pub mod rule;

pub use catalog::default_catalog;
pub use registry::{RegistryError, SubscriptionControl, TriggerRegistry};
pub use rule::{
    PlatformEventType, Pose, RuleUpdate, StateDefinition, TriggerRule, DEFAULT_STATE_KEY,
    DEFAULT_TIMEOUT_SECS,
};
