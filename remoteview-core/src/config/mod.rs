//! Configuration types for RemoteView
//!
//! Provides the capture policy the session runs under, plus the TOML file
//! it is loaded from.

mod file;

pub use file::{ConfigFile, sample_config};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::platform::{AudioMixerMode, CaptureOptimization, MediaDescription};

/// What to do when attaching a compositing effect fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EffectFailurePolicy {
    /// Log it, keep effects already attached, and start recording anyway
    #[default]
    Continue,
    /// Fail the start call with the attachment error
    Abort,
}

impl std::fmt::Display for EffectFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

impl std::str::FromStr for EffectFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" | "ignore" => Ok(Self::Continue),
            "abort" | "fail" => Ok(Self::Abort),
            _ => Err(format!("Unknown effect failure policy: {}", s)),
        }
    }
}

/// Parameters of the mixed-reality compositing video effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrcSettings {
    /// Composite holograms into the recorded stream
    pub hologram_composition: bool,
    /// Apply video stabilization
    pub video_stabilization: bool,
    /// Hologram opacity, 0.0 to 1.0
    pub global_opacity: f32,
    /// Show the recording indicator to the wearer
    pub recording_indicator: bool,
}

impl Default for MrcSettings {
    fn default() -> Self {
        Self {
            hologram_composition: true,
            video_stabilization: false,
            global_opacity: 0.9,
            recording_indicator: true,
        }
    }
}

/// Complete capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Minimum record width a profile must offer
    pub min_width: u32,
    /// Minimum record height a profile must offer
    pub min_height: u32,
    /// Frame rate a profile must offer (compared after rounding)
    pub frame_rate: u32,
    /// Fail init when no profile qualifies instead of using the device default
    pub require_profile: bool,
    /// Budget for device enumeration (None = unbounded)
    pub discovery_timeout: Option<Duration>,
    /// Budget for attaching the video effect (None = unbounded)
    pub video_effect_timeout: Option<Duration>,
    /// Budget for attaching the audio effect (None = unbounded)
    pub audio_effect_timeout: Option<Duration>,
    /// Reaction to an effect attachment failure
    pub effect_failure_policy: EffectFailurePolicy,
    /// Video effect parameters
    pub mrc: MrcSettings,
    /// Audio effect mix source
    pub mixer_mode: AudioMixerMode,
    /// Optimization hint applied once the device is initialized
    pub optimization: CaptureOptimization,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_width: 1280,
            min_height: 720,
            frame_rate: 30,
            require_profile: false,
            discovery_timeout: None,
            video_effect_timeout: None,
            audio_effect_timeout: Some(Duration::from_millis(500)),
            effect_failure_policy: EffectFailurePolicy::default(),
            mrc: MrcSettings::default(),
            mixer_mode: AudioMixerMode::Mic,
            optimization: CaptureOptimization::LatencyThenQuality,
        }
    }
}

impl CaptureConfig {
    /// Set the minimum record resolution
    pub fn with_min_resolution(mut self, width: u32, height: u32) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    /// Set the required frame rate
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Require a qualifying profile
    pub fn with_require_profile(mut self, required: bool) -> Self {
        self.require_profile = required;
        self
    }

    /// Set the device enumeration budget
    pub fn with_discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the video effect attachment budget
    pub fn with_video_effect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.video_effect_timeout = timeout;
        self
    }

    /// Set the audio effect attachment budget
    pub fn with_audio_effect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.audio_effect_timeout = timeout;
        self
    }

    /// Set the effect failure policy
    pub fn with_effect_failure_policy(mut self, policy: EffectFailurePolicy) -> Self {
        self.effect_failure_policy = policy;
        self
    }

    /// Set the video effect parameters
    pub fn with_mrc(mut self, mrc: MrcSettings) -> Self {
        self.mrc = mrc;
        self
    }

    /// Set the audio mixer mode
    pub fn with_mixer_mode(mut self, mode: AudioMixerMode) -> Self {
        self.mixer_mode = mode;
        self
    }

    /// Set the optimization hint
    pub fn with_optimization(mut self, optimization: CaptureOptimization) -> Self {
        self.optimization = optimization;
        self
    }

    /// Whether a record description satisfies the resolution and rate floor
    pub fn accepts(&self, description: &MediaDescription) -> bool {
        description.width >= self.min_width
            && description.height >= self.min_height
            && description.frame_rate.round() as i64 == self.frame_rate as i64
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.min_width < 1280 || self.min_height < 720 {
            warnings.push(format!(
                "Minimum resolution {}x{} is below 720p; remote viewers may see a soft image.",
                self.min_width, self.min_height
            ));
        }

        if let Some(timeout) = self.audio_effect_timeout {
            if timeout < Duration::from_millis(100) {
                warnings.push(format!(
                    "Audio effect budget of {} ms is very short; the effect will likely time out.",
                    timeout.as_millis()
                ));
            }
        }

        if self.mrc.global_opacity < 0.2 && self.mrc.hologram_composition {
            warnings.push(
                "Hologram opacity below 0.2 makes composited holograms nearly invisible."
                    .to_string(),
            );
        }

        if !self.mrc.recording_indicator {
            warnings.push("Recording indicator is disabled; the wearer will not see that capture is active.".to_string());
        }

        if self.effect_failure_policy == EffectFailurePolicy::Abort
            && self.video_effect_timeout.is_none()
        {
            warnings.push(
                "Abort policy with an unbounded video effect wait can stall start indefinitely."
                    .to_string(),
            );
        }

        warnings
    }

    /// Validate and return an error if configuration is invalid
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors
    /// for configurations that cannot work.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.min_width == 0 || self.min_height == 0 {
            return Err("Minimum resolution cannot be zero".to_string());
        }

        if self.frame_rate == 0 {
            return Err("Frame rate cannot be zero".to_string());
        }

        if self.frame_rate > 240 {
            return Err(format!(
                "Frame rate {} exceeds maximum supported (240)",
                self.frame_rate
            ));
        }

        if !(0.0..=1.0).contains(&self.mrc.global_opacity) {
            return Err(format!(
                "Hologram opacity {} must be between 0.0 and 1.0",
                self.mrc.global_opacity
            ));
        }

        Ok(())
    }
}
