//! Platform collaborator interfaces
//!
//! The session reaches devices, formats, the capture pipeline and the
//! network sink only through these traits. Every long-running call returns
//! an [`AsyncOperation`] that completes on a platform thread.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::async_op::{AsyncOperation, sync_get};
use crate::error::{RemoteViewError, Result};
use crate::signal::SubscriptionToken;
use crate::types::SpatialCoordinateSystem;

/// Class of capture device to enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Cameras
    VideoCapture,
    /// Microphones
    AudioCapture,
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VideoCapture => write!(f, "video capture"),
            Self::AudioCapture => write!(f, "audio capture"),
        }
    }
}

/// An enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform device id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Device class
    pub class: DeviceClass,
}

/// One format a video profile can record in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl std::fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{:.2}", self.width, self.height, self.frame_rate)
    }
}

/// A device video profile and the record formats it supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub id: String,
    pub record_descriptions: Vec<MediaDescription>,
}

/// Which streams the capture resource produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingCaptureMode {
    Video,
    AudioAndVideo,
}

/// Source used for photo capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhotoCaptureSource {
    Auto,
    VideoPreview,
    Photo,
}

/// Usage category hint given to the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaCategory {
    Other,
    Communications,
}

/// A stream on the capture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    VideoPreview,
    VideoRecord,
    Audio,
    Photo,
}

/// Quality/latency trade-off hint for the video device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureOptimization {
    #[default]
    Default,
    Quality,
    Latency,
    Power,
    LatencyThenQuality,
    LatencyThenPower,
    PowerAndQuality,
}

impl std::str::FromStr for CaptureOptimization {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "default" => Ok(Self::Default),
            "quality" => Ok(Self::Quality),
            "latency" => Ok(Self::Latency),
            "power" => Ok(Self::Power),
            "latency-then-quality" => Ok(Self::LatencyThenQuality),
            "latency-then-power" => Ok(Self::LatencyThenPower),
            "power-and-quality" => Ok(Self::PowerAndQuality),
            _ => Err(format!("Unknown optimization: {}", s)),
        }
    }
}

/// Settings used to create a capture resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitSettings {
    pub video_device_id: String,
    pub audio_device_id: Option<String>,
    pub streaming_mode: StreamingCaptureMode,
    pub photo_source: PhotoCaptureSource,
    pub media_category: MediaCategory,
    /// Selected profile id, if one qualified
    pub video_profile: Option<String>,
    pub preview_description: Option<MediaDescription>,
    pub record_description: Option<MediaDescription>,
}

/// Video stream properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEncodingProperties {
    pub subtype: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate_numerator: u32,
    pub frame_rate_denominator: u32,
    pub bitrate: u32,
}

/// Audio stream properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEncodingProperties {
    pub subtype: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    pub bitrate: u32,
}

/// Encoding profile handed to start-record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub video: VideoEncodingProperties,
    pub audio: Option<AudioEncodingProperties>,
    pub container: Option<String>,
}

/// Audio mix source for the compositing audio effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioMixerMode {
    #[default]
    Mic,
    Loopback,
    Mixed,
}

impl std::str::FromStr for AudioMixerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mic" | "microphone" => Ok(Self::Mic),
            "loopback" | "system" => Ok(Self::Loopback),
            "mixed" | "both" => Ok(Self::Mixed),
            _ => Err(format!("Unknown mixer mode: {}", s)),
        }
    }
}

/// Compositing (hologram overlay) video effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEffectDefinition {
    pub stream: StreamKind,
    pub hologram_composition: bool,
    pub video_stabilization: bool,
    pub global_opacity_coefficient: f32,
    pub recording_indicator_enabled: bool,
}

/// Audio mixing effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEffectDefinition {
    pub mixer_mode: AudioMixerMode,
}

/// Payload of the capture-failed signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFailure {
    pub code: u32,
    pub message: String,
}

/// One encoded sample delivered to a sink
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub stream: StreamKind,
    pub timestamp: Duration,
    pub data: Bytes,
}

pub type FailedHandler = Arc<dyn Fn(&CaptureFailure) + Send + Sync + 'static>;
pub type RecordLimitHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Enumerates devices of a class
pub trait DeviceDiscovery: Send + Sync {
    fn find_all(&self, class: DeviceClass) -> Result<AsyncOperation<Vec<DeviceInfo>>>;
}

/// Lists the video profiles of a device
pub trait ProfileCatalog: Send + Sync {
    fn video_profiles(&self, device_id: &str) -> Result<Vec<VideoProfile>>;
}

/// Creates and initializes capture resources
pub trait CaptureFactory: Send + Sync {
    fn create(&self, settings: &InitSettings)
    -> Result<AsyncOperation<Arc<dyn CaptureResource>>>;
}

/// Control surface of the video device
pub trait VideoController: Send + Sync {
    fn set_desired_optimization(&self, optimization: CaptureOptimization) -> Result<()>;
    fn stream_properties(&self, stream: StreamKind) -> Result<VideoEncodingProperties>;
    fn available_stream_properties(&self, stream: StreamKind)
    -> Result<Vec<VideoEncodingProperties>>;
}

/// An initialized capture pipeline
pub trait CaptureResource: Send + Sync {
    fn video_controller(&self) -> Result<Arc<dyn VideoController>>;
    fn add_video_effect(&self, definition: &VideoEffectDefinition)
    -> Result<AsyncOperation<()>>;
    fn add_audio_effect(&self, definition: &AudioEffectDefinition)
    -> Result<AsyncOperation<()>>;
    fn clear_effects(&self, stream: StreamKind) -> Result<AsyncOperation<()>>;
    fn start_record_to_sink(
        &self,
        profile: &EncodingProfile,
        sink: Arc<dyn NetworkSink>,
    ) -> Result<AsyncOperation<()>>;
    fn stop_record(&self) -> Result<AsyncOperation<()>>;
    fn close(&self) -> Result<()>;

    fn subscribe_failed(&self, handler: FailedHandler) -> Result<SubscriptionToken>;
    fn unsubscribe_failed(&self, token: SubscriptionToken) -> Result<()>;
    fn subscribe_record_limit_exceeded(
        &self,
        handler: RecordLimitHandler,
    ) -> Result<SubscriptionToken>;
    fn unsubscribe_record_limit_exceeded(&self, token: SubscriptionToken) -> Result<()>;
}

/// Endpoint a network sink streams to
pub trait Connection: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool {
        true
    }
}

/// Destination for encoded samples
pub trait NetworkSink: Send + Sync {
    fn set_spatial_coordinate_system(&self, system: Option<SpatialCoordinateSystem>);
    fn write_sample(&self, sample: MediaSample) -> Result<()>;
}

/// Builds network sinks
pub trait SinkFactory: Send + Sync {
    fn create_network_sink(
        &self,
        audio: Option<&AudioEncodingProperties>,
        video: &VideoEncodingProperties,
        connection: Arc<dyn Connection>,
    ) -> Result<Arc<dyn NetworkSink>>;
}

/// The collaborators a capture session runs against
#[derive(Clone)]
pub struct Platform {
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub profiles: Arc<dyn ProfileCatalog>,
    pub capture: Arc<dyn CaptureFactory>,
    pub sinks: Arc<dyn SinkFactory>,
}

impl Platform {
    /// Bundle collaborators
    pub fn new(
        discovery: Arc<dyn DeviceDiscovery>,
        profiles: Arc<dyn ProfileCatalog>,
        capture: Arc<dyn CaptureFactory>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            discovery,
            profiles,
            capture,
            sinks,
        }
    }

    /// Enumerate `class` and return the first device
    ///
    /// Blocks on the enumeration; fails with `NotFound` when it is empty.
    pub fn find_first_device(
        &self,
        class: DeviceClass,
        timeout: Option<Duration>,
    ) -> Result<DeviceInfo> {
        let operation = self.discovery.find_all(class)?;
        let devices = sync_get(&operation, timeout)?;
        debug!("Found {} {} device(s)", devices.len(), class);

        devices
            .into_iter()
            .next()
            .ok_or_else(|| RemoteViewError::not_found(format!("no {} device connected", class)))
    }
}
