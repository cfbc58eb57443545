//! EventSub WebSocket frames.
//!
//! Twitch pushes follow notifications over EventSub, not chat.  Every frame
//! is a JSON envelope with `metadata.message_type` selecting the payload
//! shape.  Notifications may be redelivered, so [`NotificationDeduper`]
//! remembers recent `message_id`s.

use std::collections::{HashSet, VecDeque};

use serde::Deserialize;
use serde_json::Value;

use super::NormalizedPlatformEvent;

/// Default public EventSub WebSocket endpoint.
pub const EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

#[derive(Debug, Deserialize)]
struct Envelope {
    metadata: Metadata,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    message_id: String,
    message_type: String,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    id: String,
    #[serde(default)]
    keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    reconnect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    subscription: Subscription,
    #[serde(default)]
    event: Value,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: Option<String>,
}

// ---------------------------------------------------------------------------
// EventSubFrame
// ---------------------------------------------------------------------------

/// A decoded EventSub frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSubFrame {
    Welcome {
        session_id: String,
        keepalive_secs: Option<u64>,
    },
    Keepalive,
    Notification {
        message_id: String,
        subscription_type: String,
        /// `None` when the subscription type has no platform-event mapping.
        event: Option<NormalizedPlatformEvent>,
    },
    Reconnect {
        url: String,
    },
    Revocation {
        subscription_type: String,
        status: String,
    },
    Other(String),
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<EventSubFrame, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let message_type = envelope.metadata.message_type;

    let frame = match message_type.as_str() {
        "session_welcome" => {
            let p: SessionPayload = serde_json::from_value(envelope.payload)?;
            EventSubFrame::Welcome {
                session_id: p.session.id,
                keepalive_secs: p.session.keepalive_timeout_seconds,
            }
        }
        "session_keepalive" => EventSubFrame::Keepalive,
        "session_reconnect" => {
            let p: SessionPayload = serde_json::from_value(envelope.payload)?;
            match p.session.reconnect_url {
                Some(url) => EventSubFrame::Reconnect { url },
                None => EventSubFrame::Other(message_type),
            }
        }
        "notification" => {
            let p: NotificationPayload = serde_json::from_value(envelope.payload)?;
            let event = normalize_notification(&p.subscription.kind, &p.event);
            EventSubFrame::Notification {
                message_id: envelope.metadata.message_id,
                subscription_type: p.subscription.kind,
                event,
            }
        }
        "revocation" => {
            let p: NotificationPayload = serde_json::from_value(envelope.payload)?;
            EventSubFrame::Revocation {
                subscription_type: p.subscription.kind,
                status: p.subscription.status.unwrap_or_default(),
            }
        }
        _ => EventSubFrame::Other(message_type),
    };
    Ok(frame)
}

fn str_field(event: &Value, key: &str) -> String {
    event[key].as_str().unwrap_or_default().to_owned()
}

fn u32_field(event: &Value, key: &str) -> u32 {
    event[key]
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

fn normalize_notification(kind: &str, event: &Value) -> Option<NormalizedPlatformEvent> {
    match kind {
        "channel.follow" => Some(NormalizedPlatformEvent::Follow {
            user: str_field(event, "user_name"),
        }),
        "channel.subscribe" => Some(NormalizedPlatformEvent::Subscription {
            user: str_field(event, "user_name"),
        }),
        "channel.cheer" => Some(NormalizedPlatformEvent::Bits {
            user: str_field(event, "user_name"),
            amount: u32_field(event, "bits"),
        }),
        "channel.raid" => Some(NormalizedPlatformEvent::Raid {
            user: str_field(event, "from_broadcaster_user_name"),
            viewers: u32_field(event, "viewers"),
        }),
        "channel.subscription.gift" => Some(NormalizedPlatformEvent::Gift {
            user: str_field(event, "user_name"),
            count: u32_field(event, "total").max(1),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// NotificationDeduper
// ---------------------------------------------------------------------------

/// Bounded memory of recently seen notification ids.
pub struct NotificationDeduper {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl NotificationDeduper {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "deduper capacity must be > 0");
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` the first time `id` is seen, `false` for repeats.
    pub fn first_seen(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_owned());
        self.seen.insert(id.to_owned());
        true
    }
}

impl Default for NotificationDeduper {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
