//! Audio activity detection: microphone → speaking / not-speaking edges.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → downmix
//!           → RingBuffer window → LoudnessMeasure → ActivityDetector::tick → on_change
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Instant;
//! use reactive_avatar::audio::{ActivityDetector, DetectorSettings};
//!
//! let mut detector = ActivityDetector::new(DetectorSettings {
//!     hold: None,
//!     window_size: 256,
//!     ..DetectorSettings::default()
//! });
//! detector.push_samples(&[0.3; 256]);
//! assert_eq!(detector.tick(Instant::now()), Some(true));
//! ```

pub mod buffer;
pub mod capture;
pub mod detector;
pub mod level;
pub mod monitor;

pub use buffer::RingBuffer;
pub use capture::{list_input_devices, AudioCapture, AudioChunk, SamplingError, StreamHandle};
pub use detector::{ActivityDetector, DetectorSettings};
pub use level::{downmix, LoudnessMeasure};
pub use monitor::{MonitorSettings, MonitorStatus, SpeakingCallback, SpeakingMonitor};
