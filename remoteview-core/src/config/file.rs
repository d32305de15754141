//! Configuration file loading
//!
//! Loads user configuration from `~/.config/remoteview/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CaptureConfig, EffectFailurePolicy, MrcSettings};
use crate::error::{RemoteViewError, Result};
use crate::logging::LoggingSettings;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Device and profile negotiation
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Compositing effects
    #[serde(default)]
    pub effects: EffectSettings,

    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Device and profile negotiation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Minimum record width
    #[serde(default = "default_min_width")]
    pub min_width: u32,

    /// Minimum record height
    #[serde(default = "default_min_height")]
    pub min_height: u32,

    /// Required frame rate
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Fail init when no profile qualifies
    #[serde(default)]
    pub require_profile: bool,

    /// Device enumeration budget in ms (0 = unbounded)
    #[serde(default)]
    pub discovery_timeout_ms: u64,

    /// Optimization hint (default, quality, latency, power, latency-then-quality, ...)
    #[serde(default = "default_optimization")]
    pub optimization: String,
}

/// Compositing effect settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    /// What to do when an effect fails to attach (continue, abort)
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,

    /// Video effect budget in ms (0 = unbounded)
    #[serde(default)]
    pub video_timeout_ms: u64,

    /// Audio effect budget in ms (0 = unbounded)
    #[serde(default = "default_audio_timeout_ms")]
    pub audio_timeout_ms: u64,

    /// Composite holograms into the stream
    #[serde(default = "default_true")]
    pub hologram_composition: bool,

    /// Apply video stabilization
    #[serde(default)]
    pub video_stabilization: bool,

    /// Hologram opacity
    #[serde(default = "default_opacity")]
    pub global_opacity: f32,

    /// Show the recording indicator
    #[serde(default = "default_true")]
    pub recording_indicator: bool,

    /// Audio mix source (mic, loopback, mixed)
    #[serde(default = "default_mixer_mode")]
    pub mixer_mode: String,
}

fn default_min_width() -> u32 {
    1280
}

fn default_min_height() -> u32 {
    720
}

fn default_frame_rate() -> u32 {
    30
}

fn default_optimization() -> String {
    "latency-then-quality".to_string()
}

fn default_failure_policy() -> String {
    "continue".to_string()
}

fn default_audio_timeout_ms() -> u64 {
    500
}

fn default_opacity() -> f32 {
    0.9
}

fn default_mixer_mode() -> String {
    "mic".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            frame_rate: default_frame_rate(),
            require_profile: false,
            discovery_timeout_ms: 0,
            optimization: default_optimization(),
        }
    }
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            failure_policy: default_failure_policy(),
            video_timeout_ms: 0,
            audio_timeout_ms: default_audio_timeout_ms(),
            hologram_composition: true,
            video_stabilization: false,
            global_opacity: default_opacity(),
            recording_indicator: true,
            mixer_mode: default_mixer_mode(),
        }
    }
}

fn budget(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("remoteview").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("remoteview")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/remoteview/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| RemoteViewError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RemoteViewError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)?;

        std::fs::write(&path, content)
            .map_err(|e| RemoteViewError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        Self::default().save_to(path)?;
        Ok(true)
    }

    /// Resolve the file into the runtime capture policy
    pub fn to_capture_config(&self) -> Result<CaptureConfig> {
        let optimization = self
            .capture
            .optimization
            .parse()
            .map_err(RemoteViewError::config)?;
        let effect_failure_policy: EffectFailurePolicy = self
            .effects
            .failure_policy
            .parse()
            .map_err(RemoteViewError::config)?;
        let mixer_mode = self
            .effects
            .mixer_mode
            .parse()
            .map_err(RemoteViewError::config)?;

        let config = CaptureConfig {
            min_width: self.capture.min_width,
            min_height: self.capture.min_height,
            frame_rate: self.capture.frame_rate,
            require_profile: self.capture.require_profile,
            discovery_timeout: budget(self.capture.discovery_timeout_ms),
            video_effect_timeout: budget(self.effects.video_timeout_ms),
            audio_effect_timeout: budget(self.effects.audio_timeout_ms),
            effect_failure_policy,
            mrc: MrcSettings {
                hologram_composition: self.effects.hologram_composition,
                video_stabilization: self.effects.video_stabilization,
                global_opacity: self.effects.global_opacity,
                recording_indicator: self.effects.recording_indicator,
            },
            mixer_mode,
            optimization,
        };

        config.validate_strict().map_err(RemoteViewError::config)?;
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(config)
    }

    /// Logging section
    pub fn logging_settings(&self) -> LoggingSettings {
        self.logging.clone()
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# RemoteView Configuration

[capture]
# A record profile must offer at least this resolution...
min_width = 1280
min_height = 720

# ...at this frame rate (compared after rounding, so 29.97 counts as 30)
frame_rate = 30

# Fail init when no profile qualifies instead of using the device default
require_profile = false

# Device enumeration budget in ms (0 = wait as long as it takes)
discovery_timeout_ms = 0

# Optimization hint: default, quality, latency, power,
# latency-then-quality, latency-then-power, power-and-quality
optimization = "latency-then-quality"

[effects]
# What to do when a compositing effect fails to attach:
#   "continue" - log it and start recording without the effect (default)
#   "abort"    - fail the start call
failure_policy = "continue"

# Attachment budgets in ms (0 = wait as long as it takes)
video_timeout_ms = 0
audio_timeout_ms = 500

# Mixed-reality video effect
hologram_composition = true
video_stabilization = false
global_opacity = 0.9
recording_indicator = true

# Audio effect mix source: mic, loopback, mixed
mixer_mode = "mic"

[logging]
# Level for remoteview itself; RUST_LOG still applies to everything else
level = "info"

# Also write logs to this file (replaced on every start)
# file = "/tmp/remoteview.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.capture.min_width, 1280);
        assert_eq!(config.effects.failure_policy, "continue");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sample_config_parses() {
        let config: ConfigFile = toml::from_str(&sample_config()).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_zero_budget_is_unbounded() {
        let capture = ConfigFile::default().to_capture_config().unwrap();
        assert_eq!(capture, CaptureConfig::default());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut config = ConfigFile::default();
        config.effects.failure_policy = "shrug".to_string();
        assert!(matches!(
            config.to_capture_config(),
            Err(RemoteViewError::Config(_))
        ));
    }
}
