//! Strongly-typed trigger table entries.
//!
//! A [`StateDefinition`] is one reachable avatar state: its display label,
//! the two [`Pose`]s it can show, and the [`TriggerRule`] that activates it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of the distinguished resting state.
pub const DEFAULT_STATE_KEY: &str = "default";

/// Reversion timeout applied when a rule does not specify one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

// ---------------------------------------------------------------------------
// PlatformEventType
// ---------------------------------------------------------------------------

/// Platform event types a state may bind to.
///
/// Chat messages are deliberately absent: they are matched through
/// [`TriggerRule::chat_command`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformEventType {
    Follow,
    Subscription,
    #[serde(alias = "cheer")]
    Bits,
    Raid,
    Gift,
}

impl PlatformEventType {
    /// Every bindable type, in the order the UI lists them.
    pub const ALL: [PlatformEventType; 5] = [
        PlatformEventType::Follow,
        PlatformEventType::Subscription,
        PlatformEventType::Bits,
        PlatformEventType::Raid,
        PlatformEventType::Gift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformEventType::Follow => "follow",
            PlatformEventType::Subscription => "subscription",
            PlatformEventType::Bits => "bits",
            PlatformEventType::Raid => "raid",
            PlatformEventType::Gift => "gift",
        }
    }

    /// Parse a config / UI string.  `"cheer"` is accepted for bits.
    ///
    /// ```
    /// use reactive_avatar::triggers::PlatformEventType;
    ///
    /// assert_eq!(PlatformEventType::parse("Follow"), Some(PlatformEventType::Follow));
    /// assert_eq!(PlatformEventType::parse("cheer"), Some(PlatformEventType::Bits));
    /// assert_eq!(PlatformEventType::parse("chatMessage"), None);
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "follow" => Some(PlatformEventType::Follow),
            "subscription" => Some(PlatformEventType::Subscription),
            "bits" | "cheer" => Some(PlatformEventType::Bits),
            "raid" => Some(PlatformEventType::Raid),
            "gift" => Some(PlatformEventType::Gift),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Image reference for one visual variant of a state.
///
/// Usually a path to a PNG; the renderer resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pose(pub String);

impl Pose {
    pub fn new(image: impl Into<String>) -> Self {
        Self(image.into())
    }

    pub fn image(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// TriggerRule
// ---------------------------------------------------------------------------

/// Activation rule for a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    /// Platform event that activates this state, if any.
    #[serde(default, rename = "event")]
    pub platform_event_type: Option<PlatformEventType>,
    /// Case-insensitive substring matched against chat text.
    #[serde(default, rename = "command")]
    pub chat_command: Option<String>,
    /// Seconds before the machine reverts to the default state.
    #[serde(default = "default_timeout", rename = "timeout_secs")]
    pub reversion_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for TriggerRule {
    fn default() -> Self {
        Self {
            platform_event_type: None,
            chat_command: None,
            reversion_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TriggerRule {
    /// The chat command, if it is set and not blank.
    pub fn command(&self) -> Option<&str> {
        self.chat_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Returns `true` when `text` contains the command, ignoring case.
    pub fn matches_chat(&self, text: &str) -> bool {
        match self.command() {
            Some(cmd) => text.to_lowercase().contains(&cmd.to_lowercase()),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// StateDefinition
// ---------------------------------------------------------------------------

/// One entry of the trigger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub key: String,
    pub label: String,
    pub idle_pose: Pose,
    pub speaking_pose: Pose,
    #[serde(flatten)]
    pub rule: TriggerRule,
}

impl StateDefinition {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        idle_pose: impl Into<String>,
        speaking_pose: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            idle_pose: Pose::new(idle_pose),
            speaking_pose: Pose::new(speaking_pose),
            rule: TriggerRule::default(),
        }
    }

    pub fn with_event(mut self, event: PlatformEventType) -> Self {
        self.rule.platform_event_type = Some(event);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.rule.chat_command = Some(command.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.rule.reversion_timeout_secs = secs;
        self
    }

    /// Pose shown for this state given the current speaking flag.
    pub fn pose(&self, is_speaking: bool) -> &Pose {
        if is_speaking {
            &self.speaking_pose
        } else {
            &self.idle_pose
        }
    }

    pub fn is_default(&self) -> bool {
        self.key == DEFAULT_STATE_KEY
    }
}

// ---------------------------------------------------------------------------
// RuleUpdate
// ---------------------------------------------------------------------------

/// Partial update for [`crate::triggers::TriggerRegistry::update`].
///
/// `None` keeps the prior value.  For `event` and `command` the inner
/// `Option` distinguishes "clear the binding" (`Some(None)`) from "leave it
/// alone" (`None`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    pub label: Option<String>,
    pub command: Option<Option<String>>,
    pub event: Option<Option<PlatformEventType>>,
    pub timeout_secs: Option<u64>,
}

impl RuleUpdate {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn command(mut self, command: Option<String>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn event(mut self, event: Option<PlatformEventType>) -> Self {
        self.event = Some(event);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
