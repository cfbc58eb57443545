//! Run-time state owned by the reaction machine, and the snapshot it
//! publishes to the overlay.

use tokio::time::Instant;

use crate::triggers::{Pose, StateDefinition, DEFAULT_STATE_KEY};

// ---------------------------------------------------------------------------
// MachineState
// ---------------------------------------------------------------------------

/// The machine's only mutable value.
///
/// `reversion` is `Some` exactly while `current_state_key` is not the
/// default state.
///
/// ```text
/// default ──event / command / select──▶ S   (reversion = now + S.timeout)
/// S       ──same or other trigger─────▶ S'  (reversion replaced)
/// S       ──deadline reached──────────▶ default
/// any     ──disconnect────────────────▶ default (reversion cleared)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub current_state_key: String,
    pub is_speaking: bool,
    pub reversion: Option<Reversion>,
}

/// The single pending reversion timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reversion {
    pub deadline: Instant,
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_KEY)
    }
}

impl MachineState {
    pub fn new(default_key: impl Into<String>) -> Self {
        Self {
            current_state_key: default_key.into(),
            is_speaking: false,
            reversion: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.reversion.map(|r| r.deadline)
    }
}

// ---------------------------------------------------------------------------
// PoseSnapshot
// ---------------------------------------------------------------------------

/// What the overlay should draw right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseSnapshot {
    pub state_key: String,
    pub label: String,
    pub pose: Pose,
    pub is_speaking: bool,
}

impl PoseSnapshot {
    /// Displayed pose as a pure function of the state and the speaking flag.
    pub fn of(definition: &StateDefinition, is_speaking: bool) -> Self {
        Self {
            state_key: definition.key.clone(),
            label: definition.label.clone(),
            pose: definition.pose(is_speaking).clone(),
            is_speaking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_default_without_timer() {
        let state = MachineState::default();
        assert_eq!(state.current_state_key, DEFAULT_STATE_KEY);
        assert!(!state.is_speaking);
        assert!(state.deadline().is_none());
    }

    #[test]
    fn snapshot_picks_pose_by_speaking_flag() {
        let def = StateDefinition::new("follow", "Follow", "idle.png", "talk.png");
        assert_eq!(PoseSnapshot::of(&def, false).pose.image(), "idle.png");
        assert_eq!(PoseSnapshot::of(&def, true).pose.image(), "talk.png");
        assert_eq!(PoseSnapshot::of(&def, true).label, "Follow");
    }
}
