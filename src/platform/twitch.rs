//! Twitch implementation of [`PlatformEventSource`].
//!
//! [`TwitchEventSource::connect`] validates the configured token (refreshing
//! it once when possible), then spawns two tokio tasks:
//!
//! * **chat** - IRC over WebSocket; PRIVMSG / USERNOTICE → events.
//! * **eventsub** - EventSub WebSocket; creates the `channel.follow`
//!   subscription on welcome and forwards follow notifications.
//!
//! Both tasks reconnect on their own after a fixed back-off.  They push into
//! the single `mpsc` channel given to [`TwitchEventSource::new`], so the
//! reactor sees one ordered stream.
//!
//! [`SubscriptionHandle`] is the registry's unsubscribe hook: muted event
//! types are dropped before delivery, and muting `follow` also deletes the
//! EventSub subscription.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::config::TwitchConfig;
use crate::triggers::{PlatformEventType, SubscriptionControl};

use super::eventsub::{self, EventSubFrame, NotificationDeduper, EVENTSUB_URL};
use super::helix::HelixClient;
use super::irc;
use super::{
    AuthError, ConnectionError, ConnectionStatus, NormalizedPlatformEvent, PlatformEventSource,
    UserIdentity,
};

/// Twitch chat over WebSocket (TLS).
pub const CHAT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

/// Slack added to the EventSub keepalive window before a session is
/// considered dead.
const KEEPALIVE_SLACK: Duration = Duration::from_secs(5);

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

type MutedSet = Arc<Mutex<HashSet<PlatformEventType>>>;

// ---------------------------------------------------------------------------
// SubscriptionHandle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionCommand {
    Unsubscribe(PlatformEventType),
    Resubscribe(PlatformEventType),
}

/// Non-blocking unsubscribe / resubscribe hook handed to the registry.
#[derive(Clone)]
pub struct SubscriptionHandle {
    muted: MutedSet,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
}

impl SubscriptionHandle {
    pub fn is_muted(&self, event: PlatformEventType) -> bool {
        self.muted
            .lock()
            .map(|set| set.contains(&event))
            .unwrap_or(false)
    }

    fn set_muted(&self, event: PlatformEventType, muted: bool) {
        match self.muted.lock() {
            Ok(mut set) => {
                if muted {
                    set.insert(event);
                } else {
                    set.remove(&event);
                }
            }
            Err(e) => log::warn!("twitch: subscription filter lock poisoned: {e}"),
        }
    }
}

impl SubscriptionControl for SubscriptionHandle {
    fn unsubscribe(&self, event: PlatformEventType) {
        self.set_muted(event, true);
        if self
            .commands
            .send(SubscriptionCommand::Unsubscribe(event))
            .is_err()
        {
            log::warn!("twitch: unsubscribe({event}) not delivered; source is gone");
        }
    }

    fn resubscribe(&self, event: PlatformEventType) {
        self.set_muted(event, false);
        if self
            .commands
            .send(SubscriptionCommand::Resubscribe(event))
            .is_err()
        {
            log::warn!("twitch: resubscribe({event}) not delivered; source is gone");
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Shared delivery path for both session tasks.
#[derive(Clone)]
struct EventSink {
    events: mpsc::Sender<NormalizedPlatformEvent>,
    muted: MutedSet,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl EventSink {
    /// Forward `event` unless its type is muted.  Returns `false` once the
    /// receiver has been dropped.
    async fn deliver(&self, event: NormalizedPlatformEvent) -> bool {
        if let Some(ty) = event.event_type() {
            let muted = self.muted.lock().map(|s| s.contains(&ty)).unwrap_or(false);
            if muted {
                log::debug!("twitch: dropping muted {ty} event");
                return true;
            }
        }
        self.events.send(event).await.is_ok()
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

// ---------------------------------------------------------------------------
// TwitchEventSource
// ---------------------------------------------------------------------------

struct Session {
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

pub struct TwitchEventSource {
    config: TwitchConfig,
    helix: HelixClient,
    sink: EventSink,
    handle: SubscriptionHandle,
    commands: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SubscriptionCommand>>>,
    session: Option<Session>,
}

impl TwitchEventSource {
    /// Create a source that delivers events on `events`.
    pub fn new(config: TwitchConfig, events: mpsc::Sender<NormalizedPlatformEvent>) -> Self {
        let helix = HelixClient::new(
            config.client_id.clone(),
            Duration::from_secs(config.request_timeout_secs),
        );
        let muted: MutedSet = Arc::new(Mutex::new(HashSet::new()));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            config,
            helix,
            sink: EventSink {
                events,
                muted: Arc::clone(&muted),
                status: Arc::new(status),
            },
            handle: SubscriptionHandle {
                muted,
                commands: commands_tx,
            },
            commands: Arc::new(tokio::sync::Mutex::new(commands_rx)),
            session: None,
        }
    }

    /// Hook for [`crate::triggers::TriggerRegistry::with_subscription_control`].
    pub fn subscription_handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Watch channel carrying the current [`ConnectionStatus`].
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.sink.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn authenticate(&mut self) -> Result<(String, UserIdentity), AuthError> {
        let token = self
            .config
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingToken)?;

        match self.helix.validate(&token).await {
            Ok(identity) => Ok((token, identity)),
            Err(AuthError::InvalidToken) => {
                let (Some(secret), Some(refresh)) = (
                    self.config.client_secret.clone(),
                    self.config.refresh_token.clone(),
                ) else {
                    return Err(AuthError::InvalidToken);
                };
                log::info!("twitch: access token rejected; refreshing");
                let pair = self.helix.refresh(&secret, &refresh).await?;
                let identity = self.helix.validate(&pair.access_token).await?;
                self.config.access_token = Some(pair.access_token.clone());
                if pair.refresh_token.is_some() {
                    self.config.refresh_token = pair.refresh_token;
                }
                Ok((pair.access_token, identity))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PlatformEventSource for TwitchEventSource {
    async fn connect(&mut self) -> Result<UserIdentity, AuthError> {
        if let Some(session) = self.session.take() {
            session.abort();
        }

        self.sink.set_status(ConnectionStatus::Authenticating);
        let (token, identity) = match self.authenticate().await {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("twitch: authentication failed: {e}");
                self.sink.set_status(ConnectionStatus::Failed(e.to_string()));
                return Err(e);
            }
        };
        log::info!("twitch: authenticated as {}", identity.login);

        let reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);

        let chat = tokio::spawn(run_chat(
            token.clone(),
            identity.login.clone(),
            self.sink.clone(),
            reconnect_delay,
        ));
        let eventsub = tokio::spawn(run_eventsub(
            self.helix.clone(),
            token,
            identity.clone(),
            self.sink.clone(),
            self.handle.clone(),
            Arc::clone(&self.commands),
            reconnect_delay,
        ));

        self.session = Some(Session {
            tasks: vec![chat, eventsub],
        });
        Ok(identity)
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
            log::info!("twitch: disconnected");
        }
        self.sink.set_status(ConnectionStatus::Disconnected);
        let _ = self.sink.events.send(NormalizedPlatformEvent::Disconnect).await;
    }
}

impl Drop for TwitchEventSource {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Chat task
// ---------------------------------------------------------------------------

enum SessionEnd {
    /// Socket closed or errored; reconnect after the back-off.
    Closed,
    /// Server asked us to move to another URL.
    Reconnect(String),
    /// Twitch rejected the credentials; do not retry.
    LoginFailed,
    /// The event receiver is gone; stop quietly.
    ReceiverGone,
}

async fn run_chat(token: String, login: String, sink: EventSink, reconnect_delay: Duration) {
    loop {
        match chat_session(&token, &login, &sink).await {
            Ok(SessionEnd::ReceiverGone) => return,
            Ok(SessionEnd::LoginFailed) => {
                log::error!("twitch: chat login rejected");
                sink.set_status(ConnectionStatus::Failed("chat login rejected".into()));
                let _ = sink
                    .deliver(NormalizedPlatformEvent::Error {
                        message: "chat login rejected".into(),
                    })
                    .await;
                return;
            }
            Ok(SessionEnd::Closed) | Ok(SessionEnd::Reconnect(_)) => {
                log::warn!("twitch: chat connection closed");
            }
            Err(e) => {
                log::warn!("twitch: chat connection failed: {e}");
            }
        }
        sink.set_status(ConnectionStatus::Reconnecting);
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn chat_session(
    token: &str,
    login: &str,
    sink: &EventSink,
) -> Result<SessionEnd, ConnectionError> {
    let (mut socket, _response) = tokio_tungstenite::connect_async(CHAT_URL).await?;

    for line in [
        "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
        format!("PASS oauth:{token}"),
        format!("NICK {login}"),
        format!("JOIN #{login}"),
    ] {
        socket.send(Message::Text(line)).await?;
    }

    while let Some(frame) = socket.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => return Ok(SessionEnd::Closed),
            _ => continue,
        };

        for line in text.lines() {
            let Some(msg) = irc::parse_line(line) else {
                continue;
            };
            match msg.command.as_str() {
                "PING" => {
                    let payload = msg.trailing.as_deref().unwrap_or("tmi.twitch.tv");
                    socket.send(Message::Text(format!("PONG :{payload}"))).await?;
                }
                "001" => {
                    log::info!("twitch: chat connected as {login}");
                    sink.set_status(ConnectionStatus::Connected {
                        login: login.to_string(),
                    });
                }
                "RECONNECT" => return Ok(SessionEnd::Closed),
                "NOTICE" if irc::is_login_failure(&msg) => return Ok(SessionEnd::LoginFailed),
                _ => {
                    if let Some(event) = irc::normalize(&msg) {
                        log::debug!("twitch: chat event {}", event.tag());
                        if !sink.deliver(event).await {
                            return Ok(SessionEnd::ReceiverGone);
                        }
                    }
                }
            }
        }
    }
    Ok(SessionEnd::Closed)
}

// ---------------------------------------------------------------------------
// EventSub task
// ---------------------------------------------------------------------------

struct EventSubState {
    helix: HelixClient,
    token: String,
    identity: UserIdentity,
    handle: SubscriptionHandle,
    dedupe: NotificationDeduper,
    session_id: Option<String>,
    follow_subscription: Option<String>,
    /// Set after `session_reconnect`; existing subscriptions carry over.
    migrating: bool,
}

impl EventSubState {
    async fn ensure_follow_subscription(&mut self) {
        if self.follow_subscription.is_some() || self.handle.is_muted(PlatformEventType::Follow) {
            return;
        }
        let Some(session_id) = self.session_id.as_deref() else {
            return;
        };
        match self
            .helix
            .create_follow_subscription(&self.token, &self.identity, session_id)
            .await
        {
            Ok(id) => {
                log::info!("twitch: follow subscription created ({id})");
                self.follow_subscription = Some(id);
            }
            Err(e) => log::error!("twitch: failed to create follow subscription: {e}"),
        }
    }

    fn drop_follow_subscription(&mut self) {
        let Some(id) = self.follow_subscription.take() else {
            return;
        };
        let helix = self.helix.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            match helix.delete_subscription(&token, &id).await {
                Ok(()) => log::info!("twitch: follow subscription {id} removed"),
                Err(e) => log::warn!("twitch: failed to remove follow subscription {id}: {e}"),
            }
        });
    }

    async fn apply(&mut self, command: SubscriptionCommand) {
        match command {
            SubscriptionCommand::Unsubscribe(PlatformEventType::Follow) => {
                self.drop_follow_subscription();
            }
            SubscriptionCommand::Resubscribe(PlatformEventType::Follow) => {
                self.ensure_follow_subscription().await;
            }
            // Chat-delivered types are handled by the mute filter alone.
            SubscriptionCommand::Unsubscribe(_) | SubscriptionCommand::Resubscribe(_) => {}
        }
    }
}

async fn run_eventsub(
    helix: HelixClient,
    token: String,
    identity: UserIdentity,
    sink: EventSink,
    handle: SubscriptionHandle,
    commands: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SubscriptionCommand>>>,
    reconnect_delay: Duration,
) {
    let mut commands = commands.lock().await;
    let mut state = EventSubState {
        helix,
        token,
        identity,
        handle,
        dedupe: NotificationDeduper::default(),
        session_id: None,
        follow_subscription: None,
        migrating: false,
    };
    let mut url = EVENTSUB_URL.to_string();

    loop {
        match eventsub_session(&url, &sink, &mut state, &mut commands).await {
            Ok(SessionEnd::ReceiverGone) => return,
            Ok(SessionEnd::Reconnect(next)) => {
                log::info!("twitch: EventSub asked to reconnect");
                url = next;
                state.migrating = true;
                continue;
            }
            Ok(SessionEnd::Closed) | Ok(SessionEnd::LoginFailed) => {
                log::warn!("twitch: EventSub connection closed");
            }
            Err(e) => log::warn!("twitch: EventSub connection failed: {e}"),
        }
        state.session_id = None;
        state.follow_subscription = None;
        state.migrating = false;
        url = EVENTSUB_URL.to_string();
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn eventsub_session(
    url: &str,
    sink: &EventSink,
    state: &mut EventSubState,
    commands: &mut mpsc::UnboundedReceiver<SubscriptionCommand>,
) -> Result<SessionEnd, ConnectionError> {
    let (mut socket, _response): (Socket, _) = tokio_tungstenite::connect_async(url).await?;
    let mut keepalive = Duration::from_secs(10) + KEEPALIVE_SLACK;

    loop {
        tokio::select! {
            frame = tokio::time::timeout(keepalive, socket.next()) => {
                let frame = match frame {
                    Err(_) => {
                        log::warn!("twitch: EventSub keepalive missed");
                        return Ok(SessionEnd::Closed);
                    }
                    Ok(None) => return Ok(SessionEnd::Closed),
                    Ok(Some(frame)) => frame?,
                };
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok(SessionEnd::Closed),
                    _ => continue,
                };
                let frame = match eventsub::parse_frame(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("twitch: malformed EventSub frame: {e}");
                        continue;
                    }
                };
                match frame {
                    EventSubFrame::Welcome { session_id, keepalive_secs } => {
                        if let Some(secs) = keepalive_secs {
                            keepalive = Duration::from_secs(secs) + KEEPALIVE_SLACK;
                        }
                        state.session_id = Some(session_id);
                        if state.migrating {
                            state.migrating = false;
                        } else {
                            state.ensure_follow_subscription().await;
                        }
                    }
                    EventSubFrame::Keepalive => {}
                    EventSubFrame::Notification { message_id, subscription_type, event } => {
                        if !state.dedupe.first_seen(&message_id) {
                            log::debug!("twitch: duplicate {subscription_type} notification dropped");
                            continue;
                        }
                        if let Some(event) = event {
                            if !sink.deliver(event).await {
                                return Ok(SessionEnd::ReceiverGone);
                            }
                        }
                    }
                    EventSubFrame::Reconnect { url } => return Ok(SessionEnd::Reconnect(url)),
                    EventSubFrame::Revocation { subscription_type, status } => {
                        log::warn!("twitch: {subscription_type} subscription revoked ({status})");
                        if subscription_type == "channel.follow" {
                            state.follow_subscription = None;
                        }
                    }
                    EventSubFrame::Other(kind) => log::debug!("twitch: ignoring EventSub {kind}"),
                }
            }
            Some(command) = commands.recv() => {
                state.apply(command).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
