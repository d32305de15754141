//! Simulated capture platform
//!
//! Implements every collaborator trait in-process. Asynchronous calls
//! complete on their own threads after a configurable latency, every call
//! is appended to an ordered log, and failures can be injected per call or
//! fired on demand.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::async_op::{AsyncOperation, Completer};
use crate::error::{CODE_FAIL, RemoteViewError, Result};
use crate::platform::{
    AudioEffectDefinition, AudioEncodingProperties, CaptureFactory, CaptureFailure,
    CaptureOptimization, CaptureResource, Connection, DeviceClass, DeviceDiscovery, DeviceInfo,
    EncodingProfile, FailedHandler, InitSettings, MediaDescription, MediaSample, NetworkSink,
    Platform, ProfileCatalog, RecordLimitHandler, SinkFactory, StreamKind, VideoController,
    VideoEffectDefinition, VideoEncodingProperties, VideoProfile,
};
use crate::signal::{Broadcaster, SubscriptionToken};
use crate::types::SpatialCoordinateSystem;

/// Record size a device falls back to when no profile was selected
const DEFAULT_RECORD_SIZE: (u32, u32) = (1280, 720);

/// One call made against the simulated platform
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    FindAll(DeviceClass),
    VideoProfiles(String),
    Create(InitSettings),
    SetOptimization(CaptureOptimization),
    CreateSink {
        width: u32,
        height: u32,
        audio: bool,
        connection: String,
    },
    AddVideoEffect(VideoEffectDefinition),
    AddAudioEffect(AudioEffectDefinition),
    ClearEffects(StreamKind),
    StartRecord,
    StopRecord,
    CloseCapture,
    SubscribeFailed,
    UnsubscribeFailed,
    SubscribeRecordLimit,
    UnsubscribeRecordLimit,
    SetSpatial(Option<SpatialCoordinateSystem>),
}

/// Behavior of the simulated platform
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub video_devices: Vec<DeviceInfo>,
    pub audio_devices: Vec<DeviceInfo>,
    pub profiles: Vec<VideoProfile>,
    /// Delay before each asynchronous call completes
    pub latency: Duration,
    pub fail_create: bool,
    pub fail_video_effect: bool,
    pub fail_audio_effect: bool,
    /// Leave audio effect attachments pending forever
    pub stall_audio_effect: bool,
    pub fail_start_record: bool,
    /// Interval of the synthetic sample pump; `None` disables it
    pub sample_interval: Option<Duration>,
    /// Payload size of each pumped sample
    pub sample_size: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            video_devices: vec![DeviceInfo {
                id: "sim-camera-0".to_string(),
                name: "Simulated PV Camera".to_string(),
                class: DeviceClass::VideoCapture,
            }],
            audio_devices: vec![DeviceInfo {
                id: "sim-mic-0".to_string(),
                name: "Simulated Headset Microphone".to_string(),
                class: DeviceClass::AudioCapture,
            }],
            profiles: vec![
                VideoProfile {
                    id: "sim-profile-low".to_string(),
                    record_descriptions: vec![MediaDescription {
                        width: 896,
                        height: 504,
                        frame_rate: 30.0,
                    }],
                },
                VideoProfile {
                    id: "sim-profile-hd".to_string(),
                    record_descriptions: vec![
                        MediaDescription {
                            width: 1920,
                            height: 1080,
                            frame_rate: 15.0,
                        },
                        MediaDescription {
                            width: 1280,
                            height: 720,
                            frame_rate: 29.97,
                        },
                    ],
                },
            ],
            latency: Duration::from_millis(5),
            fail_create: false,
            fail_video_effect: false,
            fail_audio_effect: false,
            stall_audio_effect: false,
            fail_start_record: false,
            sample_interval: None,
            sample_size: 1024,
        }
    }
}

impl SimOptions {
    pub fn with_video_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.video_devices = devices;
        self
    }

    pub fn with_audio_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.audio_devices = devices;
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<VideoProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_failing_video_effect(mut self) -> Self {
        self.fail_video_effect = true;
        self
    }

    pub fn with_failing_audio_effect(mut self) -> Self {
        self.fail_audio_effect = true;
        self
    }

    pub fn with_stalled_audio_effect(mut self) -> Self {
        self.stall_audio_effect = true;
        self
    }

    pub fn with_failing_start_record(mut self) -> Self {
        self.fail_start_record = true;
        self
    }

    /// Pump a sample into the bound sink every `interval` while recording
    pub fn with_sample_pump(mut self, interval: Duration, size: usize) -> Self {
        self.sample_interval = Some(interval);
        self.sample_size = size;
        self
    }
}

/// Options and call log; shared with every capture and sink
struct SimShared {
    options: Mutex<SimOptions>,
    calls: Mutex<Vec<SimCall>>,
}

/// Objects created so far; held only by the platform
#[derive(Default)]
struct SimCreated {
    captures: Mutex<Vec<Arc<SimCapture>>>,
    sinks: Mutex<Vec<Arc<SimSink>>>,
}

impl SimShared {
    fn record(&self, call: SimCall) {
        trace!("sim: {:?}", call);
        self.calls.lock().push(call);
    }

    fn latency(&self) -> Duration {
        self.options.lock().latency
    }
}

/// Finish a new operation with `result` on a separate thread
fn complete_later<T: Send + 'static>(
    label: &'static str,
    latency: Duration,
    result: Result<T>,
) -> AsyncOperation<T> {
    let (operation, completer) = AsyncOperation::pending(label);
    std::thread::spawn(move || {
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        completer.complete(result);
    });
    operation
}

/// In-process capture platform
#[derive(Clone)]
pub struct SimPlatform {
    shared: Arc<SimShared>,
    created: Arc<SimCreated>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

impl SimPlatform {
    pub fn new(options: SimOptions) -> Self {
        Self {
            shared: Arc::new(SimShared {
                options: Mutex::new(options),
                calls: Mutex::new(Vec::new()),
            }),
            created: Arc::new(SimCreated::default()),
        }
    }

    /// Bundle this simulation as the session's collaborators
    pub fn platform(&self) -> Platform {
        let this = Arc::new(self.clone());
        Platform::new(this.clone(), this.clone(), this.clone(), this)
    }

    /// Change behavior for subsequent calls
    pub fn configure(&self, update: impl FnOnce(&mut SimOptions)) {
        update(&mut self.shared.options.lock());
    }

    pub fn options(&self) -> SimOptions {
        self.shared.options.lock().clone()
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<SimCall> {
        self.shared.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().clear();
    }

    /// Number of logged calls matching `predicate`
    pub fn count_calls(&self, predicate: impl Fn(&SimCall) -> bool) -> usize {
        self.shared.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Capture resources created so far
    pub fn captures_created(&self) -> usize {
        self.created.captures.lock().len()
    }

    /// Capture resources created and not yet closed
    pub fn open_captures(&self) -> usize {
        self.created
            .captures
            .lock()
            .iter()
            .filter(|capture| !capture.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Sinks created so far
    pub fn sinks(&self) -> Vec<Arc<SimSink>> {
        self.created.sinks.lock().clone()
    }

    /// Fire the capture-failed signal on the newest capture resource
    ///
    /// Returns the number of handlers invoked.
    pub fn fire_failed(&self, code: u32, message: impl Into<String>) -> usize {
        let failure = CaptureFailure {
            code,
            message: message.into(),
        };
        match self.latest_capture() {
            Some(capture) => capture.failed.notify_all(&failure),
            None => 0,
        }
    }

    /// Fire the record-limit-exceeded signal on the newest capture resource
    pub fn fire_record_limit_exceeded(&self) -> usize {
        match self.latest_capture() {
            Some(capture) => capture.record_limit.notify_all(&()),
            None => 0,
        }
    }

    /// Handlers currently subscribed to the newest capture's signals
    pub fn signal_subscribers(&self) -> usize {
        self.latest_capture()
            .map(|capture| capture.failed.len() + capture.record_limit.len())
            .unwrap_or(0)
    }

    fn latest_capture(&self) -> Option<Arc<SimCapture>> {
        self.created.captures.lock().last().cloned()
    }
}

impl DeviceDiscovery for SimPlatform {
    fn find_all(&self, class: DeviceClass) -> Result<AsyncOperation<Vec<DeviceInfo>>> {
        self.shared.record(SimCall::FindAll(class));
        let options = self.shared.options.lock();
        let devices = match class {
            DeviceClass::VideoCapture => options.video_devices.clone(),
            DeviceClass::AudioCapture => options.audio_devices.clone(),
        };
        Ok(complete_later("find-all", options.latency, Ok(devices)))
    }
}

impl ProfileCatalog for SimPlatform {
    fn video_profiles(&self, device_id: &str) -> Result<Vec<VideoProfile>> {
        self.shared
            .record(SimCall::VideoProfiles(device_id.to_string()));
        Ok(self.shared.options.lock().profiles.clone())
    }
}

impl CaptureFactory for SimPlatform {
    fn create(&self, settings: &InitSettings) -> Result<AsyncOperation<Arc<dyn CaptureResource>>> {
        self.shared.record(SimCall::Create(settings.clone()));
        let (fail, latency) = {
            let options = self.shared.options.lock();
            (options.fail_create, options.latency)
        };
        if fail {
            return Ok(complete_later(
                "create",
                latency,
                Err(RemoteViewError::platform(CODE_FAIL, "device refused initialization")),
            ));
        }

        let (width, height) = settings
            .record_description
            .map(|d| (d.width, d.height))
            .unwrap_or(DEFAULT_RECORD_SIZE);
        let capture = Arc::new(SimCapture {
            shared: self.shared.clone(),
            width,
            height,
            failed: Broadcaster::new(),
            record_limit: Broadcaster::new(),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
            stalled: Mutex::new(Vec::new()),
        });
        self.created.captures.lock().push(capture.clone());
        debug!("sim: created capture {}x{}", width, height);

        let resource: Arc<dyn CaptureResource> = capture;
        Ok(complete_later("create", latency, Ok(resource)))
    }
}

impl SinkFactory for SimPlatform {
    fn create_network_sink(
        &self,
        audio: Option<&AudioEncodingProperties>,
        video: &VideoEncodingProperties,
        connection: Arc<dyn Connection>,
    ) -> Result<Arc<dyn NetworkSink>> {
        self.shared.record(SimCall::CreateSink {
            width: video.width,
            height: video.height,
            audio: audio.is_some(),
            connection: connection.name().to_string(),
        });
        if !connection.is_connected() {
            return Err(RemoteViewError::invalid_argument(format!(
                "connection {} is not open",
                connection.name()
            )));
        }

        let sink = Arc::new(SimSink {
            shared: self.shared.clone(),
            connection: connection.name().to_string(),
            spatial: Mutex::new(None),
            samples: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        });
        self.created.sinks.lock().push(sink.clone());
        Ok(sink)
    }
}

/// Simulated capture resource
pub struct SimCapture {
    shared: Arc<SimShared>,
    width: u32,
    height: u32,
    failed: Broadcaster<CaptureFailure>,
    record_limit: Broadcaster<()>,
    /// Running flag of the sample pump, while recording
    pump: Mutex<Option<Arc<AtomicBool>>>,
    closed: AtomicBool,
    /// Attachments that will never complete
    stalled: Mutex<Vec<Completer<()>>>,
}

impl SimCapture {
    fn stop_pump(&self) {
        if let Some(running) = self.pump.lock().take() {
            running.store(false, Ordering::SeqCst);
        }
    }

    fn start_pump(&self, sink: Arc<dyn NetworkSink>, interval: Duration, size: usize) {
        let running = Arc::new(AtomicBool::new(true));
        *self.pump.lock() = Some(running.clone());

        std::thread::spawn(move || {
            let started = Instant::now();
            let payload = Bytes::from(vec![0u8; size]);
            while running.load(Ordering::SeqCst) {
                let sample = MediaSample {
                    stream: StreamKind::VideoRecord,
                    timestamp: started.elapsed(),
                    data: payload.clone(),
                };
                if let Err(e) = sink.write_sample(sample) {
                    debug!("sim: pump stopped: {}", e);
                    break;
                }
                std::thread::sleep(interval);
            }
        });
    }
}

impl CaptureResource for SimCapture {
    fn video_controller(&self) -> Result<Arc<dyn VideoController>> {
        Ok(Arc::new(SimController {
            shared: self.shared.clone(),
            width: self.width,
            height: self.height,
        }))
    }

    fn add_video_effect(&self, definition: &VideoEffectDefinition) -> Result<AsyncOperation<()>> {
        self.shared
            .record(SimCall::AddVideoEffect(definition.clone()));
        let (fail, latency) = {
            let options = self.shared.options.lock();
            (options.fail_video_effect, options.latency)
        };
        let result = if fail {
            Err(RemoteViewError::platform(CODE_FAIL, "video effect rejected"))
        } else {
            Ok(())
        };
        Ok(complete_later("add-video-effect", latency, result))
    }

    fn add_audio_effect(&self, definition: &AudioEffectDefinition) -> Result<AsyncOperation<()>> {
        self.shared
            .record(SimCall::AddAudioEffect(definition.clone()));
        let (fail, stall, latency) = {
            let options = self.shared.options.lock();
            (
                options.fail_audio_effect,
                options.stall_audio_effect,
                options.latency,
            )
        };
        if stall {
            let (operation, completer) = AsyncOperation::pending("add-audio-effect");
            self.stalled.lock().push(completer);
            return Ok(operation);
        }
        let result = if fail {
            Err(RemoteViewError::platform(CODE_FAIL, "audio effect rejected"))
        } else {
            Ok(())
        };
        Ok(complete_later("add-audio-effect", latency, result))
    }

    fn clear_effects(&self, stream: StreamKind) -> Result<AsyncOperation<()>> {
        self.shared.record(SimCall::ClearEffects(stream));
        Ok(complete_later("clear-effects", self.shared.latency(), Ok(())))
    }

    fn start_record_to_sink(
        &self,
        _profile: &EncodingProfile,
        sink: Arc<dyn NetworkSink>,
    ) -> Result<AsyncOperation<()>> {
        self.shared.record(SimCall::StartRecord);
        let options = self.shared.options.lock().clone();
        if options.fail_start_record {
            return Ok(complete_later(
                "start-record",
                options.latency,
                Err(RemoteViewError::platform(CODE_FAIL, "encoder unavailable")),
            ));
        }
        if let Some(interval) = options.sample_interval {
            self.start_pump(sink, interval, options.sample_size);
        }
        Ok(complete_later("start-record", options.latency, Ok(())))
    }

    fn stop_record(&self) -> Result<AsyncOperation<()>> {
        self.shared.record(SimCall::StopRecord);
        self.stop_pump();
        Ok(complete_later("stop-record", self.shared.latency(), Ok(())))
    }

    fn close(&self) -> Result<()> {
        self.shared.record(SimCall::CloseCapture);
        self.stop_pump();
        self.stalled.lock().clear();
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe_failed(&self, handler: FailedHandler) -> Result<SubscriptionToken> {
        self.shared.record(SimCall::SubscribeFailed);
        Ok(self.failed.subscribe(move |failure| handler(failure)))
    }

    fn unsubscribe_failed(&self, token: SubscriptionToken) -> Result<()> {
        self.shared.record(SimCall::UnsubscribeFailed);
        self.failed.unsubscribe(token)
    }

    fn subscribe_record_limit_exceeded(
        &self,
        handler: RecordLimitHandler,
    ) -> Result<SubscriptionToken> {
        self.shared.record(SimCall::SubscribeRecordLimit);
        Ok(self.record_limit.subscribe(move |_| handler()))
    }

    fn unsubscribe_record_limit_exceeded(&self, token: SubscriptionToken) -> Result<()> {
        self.shared.record(SimCall::UnsubscribeRecordLimit);
        self.record_limit.unsubscribe(token)
    }
}

struct SimController {
    shared: Arc<SimShared>,
    width: u32,
    height: u32,
}

impl SimController {
    fn properties(&self) -> VideoEncodingProperties {
        VideoEncodingProperties {
            subtype: "NV12".to_string(),
            width: self.width,
            height: self.height,
            frame_rate_numerator: 30,
            frame_rate_denominator: 1,
            bitrate: 0,
        }
    }
}

impl VideoController for SimController {
    fn set_desired_optimization(&self, optimization: CaptureOptimization) -> Result<()> {
        self.shared.record(SimCall::SetOptimization(optimization));
        Ok(())
    }

    fn stream_properties(&self, _stream: StreamKind) -> Result<VideoEncodingProperties> {
        Ok(self.properties())
    }

    fn available_stream_properties(
        &self,
        _stream: StreamKind,
    ) -> Result<Vec<VideoEncodingProperties>> {
        Ok(vec![self.properties()])
    }
}

/// Simulated network sink; counts what it receives
pub struct SimSink {
    shared: Arc<SimShared>,
    connection: String,
    spatial: Mutex<Option<SpatialCoordinateSystem>>,
    samples: AtomicU64,
    bytes: AtomicU64,
}

impl SimSink {
    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn spatial_coordinate_system(&self) -> Option<SpatialCoordinateSystem> {
        *self.spatial.lock()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl NetworkSink for SimSink {
    fn set_spatial_coordinate_system(&self, system: Option<SpatialCoordinateSystem>) {
        self.shared.record(SimCall::SetSpatial(system));
        *self.spatial.lock() = system;
    }

    fn write_sample(&self, sample: MediaSample) -> Result<()> {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(sample.data.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Named in-process connection
#[derive(Debug)]
pub struct SimConnection {
    name: String,
    open: AtomicBool,
}

impl SimConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(true),
        }
    }

    /// Mark the connection closed; new sinks refuse it
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Connection for SimConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
