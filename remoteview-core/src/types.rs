//! Core types for RemoteView
//!
//! Handles, lifecycle phases and the small value types shared between the
//! session, the registry and the platform collaborators.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global handle counter for unique session IDs
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Key into the module registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleHandle(pub u32);

impl ModuleHandle {
    /// Handle reported to callbacks when no module was created
    pub const INVALID: ModuleHandle = ModuleHandle(0);

    /// Whether this handle could refer to a module
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module({})", self.0)
    }
}

/// Lifecycle phase of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Constructed, not initialized
    Idle,
    /// Initialized, no active recording
    Ready,
    /// Recording to a sink
    Recording,
    /// Resources released
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Ready => write!(f, "Ready"),
            Self::Recording => write!(f, "Recording"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Opaque reference frame attached to captured samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialCoordinateSystem(u64);

impl SpatialCoordinateSystem {
    /// Wrap a platform coordinate system identifier
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the platform identifier
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Point-in-time view of a session's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session handle
    pub handle: u64,
    /// Lifecycle phase
    pub phase: SessionPhase,
    /// InitAsync succeeded and the session was not closed since
    pub initialized: bool,
    /// Audio capture was requested at init
    pub audio_enabled: bool,
    /// Mixed-reality compositing was requested at start
    pub mrc_enabled: bool,
    /// Recording to a sink
    pub recording: bool,
    /// Compositing video effect attached
    pub video_effect_attached: bool,
    /// Audio mixing effect attached
    pub audio_effect_attached: bool,
    /// A capture resource is owned
    pub has_capture: bool,
    /// A sink is bound
    pub has_sink: bool,
    /// Current spatial coordinate system, if set
    pub spatial_coordinate_system: Option<SpatialCoordinateSystem>,
}

impl SessionStatus {
    /// Serialize to pretty JSON for display
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (recording: {}, effects: video={} audio={})",
            Handle(self.handle),
            self.phase,
            self.recording,
            self.video_effect_attached,
            self.audio_effect_attached
        )
    }
}
