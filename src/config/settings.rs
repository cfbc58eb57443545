//! Application settings structs and defaults, loaded from `settings.toml`.
//!
//! Every section is `#[serde(default)]`, so a partial file only overrides the
//! keys it names.  Settings are read once at start-up and never written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::{DetectorSettings, LoudnessMeasure, MonitorSettings};
use crate::triggers::{default_catalog, StateDefinition, TriggerRegistry};

use super::AppPaths;

/// Environment variable that supplies an access token when the file has none.
pub const ACCESS_TOKEN_ENV: &str = "TWITCH_ACCESS_TOKEN";

// ---------------------------------------------------------------------------
// TwitchConfig
// ---------------------------------------------------------------------------

/// Credentials and connection behaviour for the Twitch event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    /// Application client id registered with Twitch.
    pub client_id: String,
    /// User access token (without the `oauth:` prefix).
    pub access_token: Option<String>,
    /// Used together with `client_secret` for one refresh attempt when the
    /// access token is rejected.
    pub refresh_token: Option<String>,
    pub client_secret: Option<String>,
    /// Timeout applied to every HTTP call.
    pub request_timeout_secs: u64,
    /// Back-off between socket reconnect attempts.
    pub reconnect_delay_secs: u64,
    /// Connect as soon as the window opens.
    pub auto_connect: bool,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            access_token: None,
            refresh_token: None,
            client_secret: None,
            request_timeout_secs: 10,
            reconnect_delay_secs: 5,
            auto_connect: false,
        }
    }
}

impl TwitchConfig {
    pub fn has_token(&self) -> bool {
        self.access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Microphone and speaking-detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Loudness above which a tick counts as speech.
    pub threshold: f32,
    /// Hold "speaking" this long after the last loud tick.  `None` disables
    /// the hold and reports raw edges.
    pub hold_ms: Option<u64>,
    /// Analysis window in samples.
    pub window_size: usize,
    pub measure: LoudnessMeasure,
    /// Analysis ticks per second.
    pub tick_hz: u32,
    /// Start the microphone at launch.
    pub enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            threshold: crate::audio::detector::DEFAULT_THRESHOLD,
            hold_ms: Some(350),
            window_size: crate::audio::detector::DEFAULT_WINDOW_SIZE,
            measure: LoudnessMeasure::Rms,
            tick_hz: crate::audio::monitor::DEFAULT_TICK_HZ,
            enabled: true,
        }
    }
}

impl AudioConfig {
    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            threshold: self.threshold,
            hold: self.hold_ms.map(Duration::from_millis),
            window_size: self.window_size,
            measure: self.measure,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            device: self.device.clone().filter(|d| !d.trim().is_empty()),
            detector: self.detector_settings(),
            tick_hz: self.tick_hz,
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// Overlay window appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Initial window position `(x, y)`; `None` lets the window manager pick.
    pub window_position: Option<(f32, f32)>,
    pub always_on_top: bool,
    /// Background behind the avatar, RGB.  Green by default for chroma
    /// keying in the broadcast software.
    pub background: [u8; 3],
    /// Avatar draw size in points.
    pub avatar_size: (f32, f32),
    /// Show the control side panel at launch.
    pub show_controls: bool,
    /// Directory pose paths are resolved against; defaults to the working
    /// directory.
    pub assets_dir: Option<PathBuf>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_position: None,
            always_on_top: true,
            background: [0, 255, 0],
            avatar_size: (400.0, 400.0),
            show_controls: true,
            assets_dir: None,
        }
    }
}

impl UiConfig {
    /// Absolute location of a pose image.
    pub fn resolve_pose(&self, image: &str) -> PathBuf {
        let path = Path::new(image);
        match &self.assets_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, read from `settings.toml`.
///
/// ```toml
/// [twitch]
/// client_id = "abc123"
///
/// [audio]
/// threshold = 0.03
/// measure = "mean_abs_deviation"
///
/// [[states]]
/// key = "default"
/// label = "Default"
/// idle_pose = "assets/Default_Closed_Mouth.png"
/// speaking_pose = "assets/Default_Open_Mouth.png"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub twitch: TwitchConfig,
    pub audio: AudioConfig,
    pub ui: UiConfig,
    /// Host-supplied catalog.  Empty means the built-in catalog.
    pub states: Vec<StateDefinition>,
}

impl AppConfig {
    /// Load from the platform `settings.toml`, then apply environment
    /// overrides.  A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&AppPaths::new().settings_file)?;
        config.apply_env_token(std::env::var(ACCESS_TOKEN_ENV).ok());
        Ok(config)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Fill a missing access token from `value`.  A token already in the
    /// file wins.
    pub fn apply_env_token(&mut self, value: Option<String>) {
        if self.twitch.has_token() {
            return;
        }
        if let Some(token) = value.filter(|t| !t.trim().is_empty()) {
            let token = token.trim();
            let token = token.strip_prefix("oauth:").unwrap_or(token);
            self.twitch.access_token = Some(token.to_string());
        }
    }

    /// Validated trigger registry for the configured (or built-in) catalog.
    pub fn registry(&self) -> Result<TriggerRegistry> {
        let catalog = if self.states.is_empty() {
            default_catalog()
        } else {
            self.states.clone()
        };
        TriggerRegistry::from_definitions(catalog).context("invalid [[states]] catalog")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
