//! Twitch reactive avatar.
//!
//! A chroma-keyed overlay whose pose follows two inputs: the streamer's
//! microphone (mouth open while speaking) and Twitch activity (follows,
//! subs, bits and chat commands switch the avatar into a timed state).
//!
//! | Module | Role |
//! |--------|------|
//! | [`audio`] | Microphone capture and speaking detection |
//! | [`platform`] | Twitch chat + EventSub, normalised to [`platform::NormalizedPlatformEvent`] |
//! | [`triggers`] | State catalog and event/command bindings |
//! | [`reactor`] | Reaction state machine publishing [`reactor::PoseSnapshot`] |
//! | [`config`] | `settings.toml` loading |
//! | [`app`] | egui overlay window |

pub mod app;
pub mod audio;
pub mod config;
pub mod platform;
pub mod reactor;
pub mod triggers;
