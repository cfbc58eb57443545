//! Long-running task that owns a [`PlatformEventSource`] and applies
//! connect / disconnect commands from the host.
//!
//! A command arriving while a connect attempt is still in flight drops that
//! attempt's future, which cancels its pending authentication requests.
//! Closing the command channel disconnects the source and ends the task.

use tokio::sync::mpsc;

use super::PlatformEventSource;

/// Commands sent from the UI thread to the platform task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCommand {
    Connect,
    Disconnect,
}

pub async fn run_platform<S: PlatformEventSource>(
    mut source: S,
    mut command_rx: mpsc::Receiver<PlatformCommand>,
) {
    let mut pending = command_rx.recv().await;

    while let Some(cmd) = pending.take() {
        match cmd {
            PlatformCommand::Connect => {
                tokio::select! {
                    result = source.connect() => match result {
                        Ok(identity) => log::info!("platform: connected as {}", identity.login),
                        Err(e) => log::error!("platform: connect failed: {e}"),
                    },
                    next = command_rx.recv() => {
                        log::info!("platform: connect attempt interrupted");
                        pending = next;
                        if pending.is_none() {
                            break;
                        }
                        continue;
                    }
                }
            }
            PlatformCommand::Disconnect => {
                source.disconnect().await;
                log::info!("platform: disconnected");
            }
        }
        pending = command_rx.recv().await;
    }

    source.disconnect().await;
    log::info!("platform: command channel closed; task exiting");
}
