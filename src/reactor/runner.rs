//! The single consumer that serialises every machine mutation.
//!
//! # Flow
//!
//! ```text
//! platform mpsc ──────────┐
//! ReactorHandle (inputs) ─┼──▶ ReactorRunner::run  (one tokio task)
//! reversion deadline ─────┘        │
//!                                  └──▶ watch<PoseSnapshot>  ──▶ overlay
//! ```
//!
//! The reversion timer is the machine's deadline polled by the same
//! `select!`, so a fired timer and a cancelling event can never both apply.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::platform::NormalizedPlatformEvent;
use crate::triggers::{RegistryError, RuleUpdate, StateDefinition, TriggerRegistry};

use super::machine::ReactionMachine;
use super::state::PoseSnapshot;

const INPUT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// ReactorError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReactorError {
    #[error("reaction machine has stopped")]
    Closed,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// ReactorInput
// ---------------------------------------------------------------------------

/// Everything the runner consumes besides platform events.
#[derive(Debug)]
pub enum ReactorInput {
    Speaking(bool),
    Select {
        key: String,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    GetRule {
        key: String,
        reply: oneshot::Sender<Result<StateDefinition, RegistryError>>,
    },
    UpdateRule {
        key: String,
        update: RuleUpdate,
        reply: oneshot::Sender<Result<StateDefinition, RegistryError>>,
    },
    Definitions {
        reply: oneshot::Sender<Vec<StateDefinition>>,
    },
}

// ---------------------------------------------------------------------------
// ReactorRunner
// ---------------------------------------------------------------------------

pub struct ReactorRunner {
    machine: ReactionMachine,
    inputs: mpsc::Receiver<ReactorInput>,
    poses: watch::Sender<PoseSnapshot>,
}

impl ReactorRunner {
    /// Build the runner and its host handle.
    pub fn new(registry: TriggerRegistry) -> (Self, ReactorHandle) {
        let machine = ReactionMachine::new(registry);
        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_CAPACITY);
        let (poses_tx, poses_rx) = watch::channel(machine.snapshot());

        let runner = Self {
            machine,
            inputs: inputs_rx,
            poses: poses_tx,
        };
        let handle = ReactorHandle {
            inputs: inputs_tx,
            poses: poses_rx,
        };
        (runner, handle)
    }

    /// Run until both the platform channel and every handle are gone.
    pub async fn run(mut self, mut platform: mpsc::Receiver<NormalizedPlatformEvent>) {
        let mut platform_open = true;
        let mut inputs_open = true;

        while platform_open || inputs_open {
            let deadline = self.machine.next_deadline();

            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.machine.revert_if_due(Instant::now());
                }
                input = self.inputs.recv(), if inputs_open => match input {
                    Some(input) => self.apply(input),
                    None => inputs_open = false,
                },
                event = platform.recv(), if platform_open => match event {
                    Some(event) => self.machine.handle_event(&event, Instant::now()),
                    None => {
                        log::info!("reactor: platform channel closed");
                        platform_open = false;
                    }
                },
            }

            self.publish();
        }

        log::info!("reactor: all inputs closed, machine stopping");
    }

    fn apply(&mut self, input: ReactorInput) {
        let now = Instant::now();
        match input {
            ReactorInput::Speaking(speaking) => {
                self.machine.set_speaking(speaking);
            }
            ReactorInput::Select { key, reply } => {
                let result = self.machine.select(&key, now);
                if let Err(e) = &result {
                    log::warn!("reactor: select rejected: {e}");
                }
                let _ = reply.send(result);
            }
            ReactorInput::GetRule { key, reply } => {
                let _ = reply.send(self.machine.trigger_rule(&key));
            }
            ReactorInput::UpdateRule { key, update, reply } => {
                let _ = reply.send(self.machine.update_trigger_rule(&key, update));
            }
            ReactorInput::Definitions { reply } => {
                let _ = reply.send(self.machine.definitions());
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.poses.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                log::debug!(
                    "reactor: pose → {} (speaking={})",
                    snapshot.state_key,
                    snapshot.is_speaking
                );
                *current = snapshot;
                true
            }
        });
    }
}

// ---------------------------------------------------------------------------
// ReactorHandle
// ---------------------------------------------------------------------------

/// Cloneable host surface of the machine.
///
/// The async methods must be awaited inside a tokio runtime; the
/// `blocking_*` variants are for plain threads (UI, audio) and panic if
/// called from within an async context.
#[derive(Clone)]
pub struct ReactorHandle {
    inputs: mpsc::Sender<ReactorInput>,
    poses: watch::Receiver<PoseSnapshot>,
}

impl ReactorHandle {
    pub fn current_pose(&self) -> PoseSnapshot {
        self.poses.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoseSnapshot> {
        self.poses.clone()
    }

    /// Spawn a task calling `callback` on every published snapshot change.
    pub fn on_pose_changed<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(&PoseSnapshot) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                callback(&snapshot);
            }
        })
    }

    pub async fn set_speaking(&self, speaking: bool) -> Result<(), ReactorError> {
        self.send(ReactorInput::Speaking(speaking)).await
    }

    pub async fn select_state(&self, key: &str) -> Result<(), ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ReactorInput::Select {
            key: key.to_string(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| ReactorError::Closed)??)
    }

    pub async fn trigger_rule(&self, key: &str) -> Result<StateDefinition, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ReactorInput::GetRule {
            key: key.to_string(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| ReactorError::Closed)??)
    }

    pub async fn update_trigger_rule(
        &self,
        key: &str,
        update: RuleUpdate,
    ) -> Result<StateDefinition, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ReactorInput::UpdateRule {
            key: key.to_string(),
            update,
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| ReactorError::Closed)??)
    }

    pub async fn definitions(&self) -> Result<Vec<StateDefinition>, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.send(ReactorInput::Definitions { reply }).await?;
        rx.await.map_err(|_| ReactorError::Closed)
    }

    async fn send(&self, input: ReactorInput) -> Result<(), ReactorError> {
        self.inputs.send(input).await.map_err(|_| ReactorError::Closed)
    }

    // -----------------------------------------------------------------------
    // Blocking variants
    // -----------------------------------------------------------------------

    pub fn blocking_set_speaking(&self, speaking: bool) -> Result<(), ReactorError> {
        self.blocking_send(ReactorInput::Speaking(speaking))
    }

    pub fn blocking_select_state(&self, key: &str) -> Result<(), ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(ReactorInput::Select {
            key: key.to_string(),
            reply,
        })?;
        Ok(rx.blocking_recv().map_err(|_| ReactorError::Closed)??)
    }

    pub fn blocking_trigger_rule(&self, key: &str) -> Result<StateDefinition, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(ReactorInput::GetRule {
            key: key.to_string(),
            reply,
        })?;
        Ok(rx.blocking_recv().map_err(|_| ReactorError::Closed)??)
    }

    pub fn blocking_update_trigger_rule(
        &self,
        key: &str,
        update: RuleUpdate,
    ) -> Result<StateDefinition, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(ReactorInput::UpdateRule {
            key: key.to_string(),
            update,
            reply,
        })?;
        Ok(rx.blocking_recv().map_err(|_| ReactorError::Closed)??)
    }

    pub fn blocking_definitions(&self) -> Result<Vec<StateDefinition>, ReactorError> {
        let (reply, rx) = oneshot::channel();
        self.blocking_send(ReactorInput::Definitions { reply })?;
        rx.blocking_recv().map_err(|_| ReactorError::Closed)
    }

    fn blocking_send(&self, input: ReactorInput) -> Result<(), ReactorError> {
        self.inputs
            .blocking_send(input)
            .map_err(|_| ReactorError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{default_catalog, PlatformEventType, DEFAULT_STATE_KEY};
    use tokio::time::{advance, Duration};

    struct Harness {
        handle: ReactorHandle,
        platform: mpsc::Sender<NormalizedPlatformEvent>,
        task: JoinHandle<()>,
    }

    fn spawn_with_follow_timeout(secs: u64) -> Harness {
        let mut catalog = default_catalog();
        for def in &mut catalog {
            if def.key == "follow" {
                def.rule.reversion_timeout_secs = secs;
            }
        }
        let registry = TriggerRegistry::from_definitions(catalog).unwrap();
        let (runner, handle) = ReactorRunner::new(registry);
        let (platform, platform_rx) = mpsc::channel(16);
        let task = tokio::spawn(runner.run(platform_rx));
        Harness {
            handle,
            platform,
            task,
        }
    }

    fn follow() -> NormalizedPlatformEvent {
        NormalizedPlatformEvent::Follow {
            user: "viewer".into(),
        }
    }

    /// Round-trip through the runner so every earlier input has been applied.
    async fn settle(handle: &ReactorHandle) {
        handle.definitions().await.unwrap();
    }

    async fn settle_platform(h: &Harness) {
        // Platform events share no queue with handle inputs; yield until the
        // runner has drained the platform channel.
        while h.platform.capacity() < h.platform.max_capacity() {
            tokio::task::yield_now().await;
        }
        settle(&h.handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn follow_reverts_after_its_timeout() {
        let h = spawn_with_follow_timeout(5);

        h.platform.send(follow()).await.unwrap();
        settle_platform(&h).await;
        assert_eq!(h.handle.current_pose().state_key, "follow");

        advance(Duration::from_millis(4_990)).await;
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, "follow");

        advance(Duration::from_millis(20)).await;
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, DEFAULT_STATE_KEY);
    }

    #[tokio::test(start_paused = true)]
    async fn second_event_restarts_the_timer() {
        let h = spawn_with_follow_timeout(5);

        h.platform.send(follow()).await.unwrap();
        settle_platform(&h).await;
        advance(Duration::from_secs(3)).await;

        h.platform.send(follow()).await.unwrap();
        settle_platform(&h).await;

        // 5 s after the first event: still up.
        advance(Duration::from_secs(2)).await;
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, "follow");

        // 5 s after the second event: back to default, not 10 s.
        advance(Duration::from_millis(3_010)).await;
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, DEFAULT_STATE_KEY);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reversion() {
        let h = spawn_with_follow_timeout(5);

        h.platform.send(follow()).await.unwrap();
        h.platform.send(NormalizedPlatformEvent::Disconnect).await.unwrap();
        settle_platform(&h).await;
        assert_eq!(h.handle.current_pose().state_key, DEFAULT_STATE_KEY);

        // Re-enter via chat; the old follow deadline must not revert it.
        h.platform
            .send(NormalizedPlatformEvent::ChatMessage {
                user: "v".into(),
                message: "!payaso".into(),
            })
            .await
            .unwrap();
        settle_platform(&h).await;
        advance(Duration::from_secs(6)).await;
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, "clown");
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_is_orthogonal_to_state() {
        let h = spawn_with_follow_timeout(5);
        h.platform.send(follow()).await.unwrap();
        settle_platform(&h).await;

        h.handle.set_speaking(true).await.unwrap();
        settle(&h.handle).await;
        let pose = h.handle.current_pose();
        assert_eq!(pose.state_key, "follow");
        assert!(pose.is_speaking);
        assert!(pose.pose.image().ends_with("Follower_Open_Mouth.png"));

        h.handle.set_speaking(false).await.unwrap();
        settle(&h.handle).await;
        let pose = h.handle.current_pose();
        assert_eq!(pose.state_key, "follow");
        assert!(!pose.is_speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_survives_reversion() {
        let h = spawn_with_follow_timeout(1);
        h.handle.set_speaking(true).await.unwrap();
        h.platform.send(follow()).await.unwrap();
        settle_platform(&h).await;

        advance(Duration::from_millis(1_010)).await;
        settle(&h.handle).await;
        let pose = h.handle.current_pose();
        assert_eq!(pose.state_key, DEFAULT_STATE_KEY);
        assert!(pose.is_speaking);
        assert!(pose.pose.image().ends_with("Default_Open_Mouth.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn rule_update_surfaces_conflict() {
        let h = spawn_with_follow_timeout(5);
        let err = h
            .handle
            .update_trigger_rule(
                "clown",
                RuleUpdate::default().event(Some(PlatformEventType::Bits)),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReactorError::Registry(RegistryError::Conflict {
                event: PlatformEventType::Bits,
                occupied_by: "bits".into(),
            })
        );

        let clown = h.handle.trigger_rule("clown").await.unwrap();
        assert!(clown.rule.platform_event_type.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn select_state_previews_and_reverts() {
        let h = spawn_with_follow_timeout(5);
        h.handle.select_state("follow").await.unwrap();
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, "follow");

        let err = h.handle.select_state("nope").await.unwrap_err();
        assert_eq!(
            err,
            ReactorError::Registry(RegistryError::NotFound { key: "nope".into() })
        );

        advance(Duration::from_millis(5_010)).await;
        settle(&h.handle).await;
        assert_eq!(h.handle.current_pose().state_key, DEFAULT_STATE_KEY);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_only_fires_on_change() {
        let h = spawn_with_follow_timeout(5);
        let mut rx = h.handle.subscribe();
        let _ = rx.borrow_and_update();

        // Unbound event: nothing to publish.
        h.platform
            .send(NormalizedPlatformEvent::ChatMessage {
                user: "v".into(),
                message: "hello".into(),
            })
            .await
            .unwrap();
        settle_platform(&h).await;
        assert!(!rx.has_changed().unwrap());

        h.platform.send(follow()).await.unwrap();
        settle_platform(&h).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state_key, "follow");
    }

    #[tokio::test(start_paused = true)]
    async fn on_pose_changed_invokes_callback() {
        let h = spawn_with_follow_timeout(5);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _watcher = h.handle.on_pose_changed(move |snap| {
            let _ = seen_tx.send(snap.state_key.clone());
        });

        h.handle.select_state("bits").await.unwrap();
        assert_eq!(seen_rx.recv().await.as_deref(), Some("bits"));
    }

    #[tokio::test(start_paused = true)]
    async fn runner_stops_when_all_inputs_close() {
        let h = spawn_with_follow_timeout(5);
        let Harness {
            handle,
            platform,
            task,
        } = h;
        let watcher = handle.subscribe();
        drop(handle);
        drop(platform);
        task.await.unwrap();

        assert_eq!(watcher.borrow().state_key, DEFAULT_STATE_KEY);
    }
}
