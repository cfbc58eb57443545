//! Configuration: `AppConfig` (top-level settings), one sub-config per
//! subsystem, and `AppPaths` for the platform config directory.
//!
//! Loaded once via `AppConfig::load`; nothing writes it back.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, TwitchConfig, UiConfig, ACCESS_TOKEN_ENV};
