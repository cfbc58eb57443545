//! Reaction state machine: platform events + speaking edges → displayed pose.
//!
//! # Architecture
//!
//! ```text
//! NormalizedPlatformEvent (mpsc) ──┐
//! speaking edges (ReactorHandle) ──┼──▶ ReactorRunner  ──▶ watch<PoseSnapshot>
//! host rule edits (ReactorHandle) ─┘    (owns ReactionMachine + TriggerRegistry)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tokio::sync::mpsc;
//! use reactive_avatar::reactor::ReactorRunner;
//! use reactive_avatar::triggers::{default_catalog, TriggerRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = TriggerRegistry::from_definitions(default_catalog()).unwrap();
//!     let (runner, handle) = ReactorRunner::new(registry);
//!     let (_events_tx, events_rx) = mpsc::channel(64);
//!     tokio::spawn(runner.run(events_rx));
//!
//!     handle.set_speaking(true).await.unwrap();
//!     println!("{:?}", handle.current_pose());
//! }
//! ```

pub mod machine;
pub mod runner;
pub mod state;

pub use machine::ReactionMachine;
pub use runner::{ReactorError, ReactorHandle, ReactorInput, ReactorRunner};
pub use state::{MachineState, PoseSnapshot, Reversion};
