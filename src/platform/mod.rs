//! Platform event source - Twitch chat + EventSub, normalised to one event
//! shape.
//!
//! # Architecture
//!
//! ```text
//! irc-ws.chat.twitch.tv ──▶ irc::normalize ───────┐
//!                                                 ├──▶ mpsc<NormalizedPlatformEvent> ──▶ reactor
//! eventsub.wss.twitch.tv ─▶ eventsub::parse_frame ┘        (one channel, arrival order)
//! ```
//!
//! [`TwitchEventSource`] owns authentication, both sockets, and the
//! subscription filter.  The reactor only ever sees
//! [`NormalizedPlatformEvent`]s.

pub mod eventsub;
pub mod helix;
pub mod irc;
pub mod task;
pub mod twitch;

use async_trait::async_trait;
use thiserror::Error;

use crate::triggers::PlatformEventType;

pub use eventsub::{EventSubFrame, NotificationDeduper};
pub use helix::HelixClient;
pub use task::{run_platform, PlatformCommand};
pub use twitch::{SubscriptionHandle, TwitchEventSource};

// ---------------------------------------------------------------------------
// NormalizedPlatformEvent
// ---------------------------------------------------------------------------

/// Canonical inbound event.  Produced by the source, consumed once by the
/// reactor, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedPlatformEvent {
    ChatMessage { user: String, message: String },
    Follow { user: String },
    Subscription { user: String },
    Bits { user: String, amount: u32 },
    Raid { user: String, viewers: u32 },
    Gift { user: String, count: u32 },
    Disconnect,
    Error { message: String },
}

impl NormalizedPlatformEvent {
    /// The bindable type of this event, if it has one.
    ///
    /// Chat, disconnect and error events return `None`.
    pub fn event_type(&self) -> Option<PlatformEventType> {
        match self {
            NormalizedPlatformEvent::Follow { .. } => Some(PlatformEventType::Follow),
            NormalizedPlatformEvent::Subscription { .. } => Some(PlatformEventType::Subscription),
            NormalizedPlatformEvent::Bits { .. } => Some(PlatformEventType::Bits),
            NormalizedPlatformEvent::Raid { .. } => Some(PlatformEventType::Raid),
            NormalizedPlatformEvent::Gift { .. } => Some(PlatformEventType::Gift),
            NormalizedPlatformEvent::ChatMessage { .. }
            | NormalizedPlatformEvent::Disconnect
            | NormalizedPlatformEvent::Error { .. } => None,
        }
    }

    /// Short tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            NormalizedPlatformEvent::ChatMessage { .. } => "chatMessage",
            NormalizedPlatformEvent::Follow { .. } => "follow",
            NormalizedPlatformEvent::Subscription { .. } => "subscription",
            NormalizedPlatformEvent::Bits { .. } => "bits",
            NormalizedPlatformEvent::Raid { .. } => "raid",
            NormalizedPlatformEvent::Gift { .. } => "gift",
            NormalizedPlatformEvent::Disconnect => "disconnect",
            NormalizedPlatformEvent::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// UserIdentity
// ---------------------------------------------------------------------------

/// The authenticated broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub login: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no Twitch access token configured")]
    MissingToken,

    #[error("Twitch rejected the access token")]
    InvalidToken,

    #[error("authentication request failed: {0}")]
    Request(String),

    #[error("authentication request timed out")]
    Timeout,

    #[error("token validation returned no user identity")]
    MissingIdentity,
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AuthError::Timeout
        } else {
            AuthError::Request(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("connection closed by server")]
    Closed,

    #[error("EventSub subscription failed: {0}")]
    Subscription(String),
}

impl From<reqwest::Error> for ConnectionError {
    fn from(e: reqwest::Error) -> Self {
        ConnectionError::Request(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectionError::WebSocket(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Connection state surfaced to the host as status text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Authenticating,
    Connected { login: String },
    Reconnecting,
    Failed(String),
}

impl ConnectionStatus {
    pub fn label(&self) -> String {
        match self {
            ConnectionStatus::Disconnected => "Disconnected".into(),
            ConnectionStatus::Authenticating => "Authenticating…".into(),
            ConnectionStatus::Connected { login } => format!("Connected: #{login}"),
            ConnectionStatus::Reconnecting => "Reconnecting…".into(),
            ConnectionStatus::Failed(reason) => format!("Failed: {reason}"),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }
}

// ---------------------------------------------------------------------------
// PlatformEventSource
// ---------------------------------------------------------------------------

/// Event-producing boundary consumed by the core.
///
/// Events are delivered on the channel the source was constructed with.
/// Dropping the future returned by [`connect`](Self::connect) cancels any
/// in-flight authentication request.
#[async_trait]
pub trait PlatformEventSource: Send {
    async fn connect(&mut self) -> Result<UserIdentity, AuthError>;
    async fn disconnect(&mut self);
}
