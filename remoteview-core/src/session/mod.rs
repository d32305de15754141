//! Capture session state machine
//!
//! A [`CaptureEngine`] walks a capture device through
//! `Idle → Ready → Recording → Closed`. All state lives in one
//! [`SessionState`] behind a single lock that platform completions share
//! with callers. The lock is never held across a blocking platform call
//! and never held while a caller's operation is completed.

mod effects;
mod profile;

pub use effects::{audio_effect, video_effect};
pub use profile::{ProfileSelection, init_settings, select_profile};

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::async_op::{AsyncOperation, Completer};
use crate::config::CaptureConfig;
use crate::error::{RemoteViewError, Result, ResultExt};
use crate::platform::{
    CaptureFailure, CaptureResource, Connection, DeviceClass, EncodingProfile, NetworkSink,
    Platform, StreamKind,
};
use crate::signal::{Broadcaster, SubscriptionToken};
use crate::types::{Handle, SessionPhase, SessionStatus, SpatialCoordinateSystem};

/// Mutable session state, guarded by [`Inner::state`]
#[derive(Default)]
struct SessionState {
    initialized: bool,
    initializing: bool,
    /// Set by `uninitialize`; the session never initializes again
    retired: bool,
    /// A resource was released since the last successful init
    closed: bool,
    audio_enabled: bool,
    mrc_enabled: bool,
    starting: bool,
    recording: bool,
    video_effect_attached: bool,
    audio_effect_attached: bool,
    /// The Closed broadcaster already fired for the current recording
    closed_notified: bool,
    spatial: Option<SpatialCoordinateSystem>,
    capture: Option<Arc<dyn CaptureResource>>,
    sink: Option<Arc<dyn NetworkSink>>,
    failed_token: Option<SubscriptionToken>,
    record_limit_token: Option<SubscriptionToken>,
    /// Callers waiting on the in-flight stop, if one is running
    stop_waiters: Option<Vec<Completer<()>>>,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        if self.recording {
            SessionPhase::Recording
        } else if self.initialized && self.capture.is_some() {
            SessionPhase::Ready
        } else if self.closed || self.retired {
            SessionPhase::Closed
        } else {
            SessionPhase::Idle
        }
    }

    fn is_current(&self, capture: &Arc<dyn CaptureResource>) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|owned| Arc::ptr_eq(owned, capture))
    }
}

/// Everything `release` takes out of the state in one step
struct Released {
    capture: Arc<dyn CaptureResource>,
    failed_token: Option<SubscriptionToken>,
    record_limit_token: Option<SubscriptionToken>,
    video_effect_attached: bool,
    audio_effect_attached: bool,
}

/// Loss-handler subscriptions made by one start
#[derive(Debug, Clone, Copy)]
struct SignalTokens {
    failed: SubscriptionToken,
    limit: SubscriptionToken,
}

fn closed_while_starting() -> RemoteViewError {
    RemoteViewError::invalid_state("session closed while starting")
}

struct Inner {
    handle: Handle,
    platform: Platform,
    config: CaptureConfig,
    state: Mutex<SessionState>,
    closed: Broadcaster<Handle>,
}

/// A live capture session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct CaptureEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("handle", &self.inner.handle)
            .field("phase", &self.phase())
            .finish()
    }
}

impl CaptureEngine {
    /// Create an idle session
    pub fn new(platform: Platform, config: CaptureConfig) -> Self {
        let handle = Handle::new();
        debug!("Created capture session {}", handle);
        Self {
            inner: Arc::new(Inner {
                handle,
                platform,
                config,
                state: Mutex::new(SessionState::default()),
                closed: Broadcaster::new(),
            }),
        }
    }

    /// Create a session and initialize it
    ///
    /// The returned operation resolves to the ready session, or to the
    /// init failure.
    pub fn create_async(
        platform: Platform,
        config: CaptureConfig,
        enable_audio: bool,
    ) -> Result<AsyncOperation<CaptureEngine>> {
        let engine = Self::new(platform, config);
        let init = engine.init_async(enable_audio)?;
        init.chain("create", move |()| Ok(engine))
    }

    /// Session handle, as carried by Closed notifications
    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Capture policy this session runs under
    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    pub fn is_recording(&self) -> bool {
        self.inner.state.lock().recording
    }

    /// Point-in-time snapshot of the session
    pub fn status(&self) -> SessionStatus {
        let state = self.inner.state.lock();
        SessionStatus {
            handle: self.inner.handle.as_u64(),
            phase: state.phase(),
            initialized: state.initialized,
            audio_enabled: state.audio_enabled,
            mrc_enabled: state.mrc_enabled,
            recording: state.recording,
            video_effect_attached: state.video_effect_attached,
            audio_effect_attached: state.audio_effect_attached,
            has_capture: state.capture.is_some(),
            has_sink: state.sink.is_some(),
            spatial_coordinate_system: state.spatial,
        }
    }

    /// Discover devices, negotiate a profile and create the capture resource
    ///
    /// Discovery blocks the calling thread. Missing devices and a missing
    /// required profile fail synchronously with `NotFound`; a creation
    /// failure is delivered on the returned operation.
    pub fn init_async(&self, enable_audio: bool) -> Result<AsyncOperation<()>> {
        {
            let mut state = self.inner.state.lock();
            if state.retired {
                return Err(RemoteViewError::invalid_state(
                    "session has been uninitialized",
                ));
            }
            if state.initializing {
                return Err(RemoteViewError::invalid_state(
                    "initialization already in progress",
                ));
            }
            if state.initialized {
                return Err(RemoteViewError::invalid_state("session already initialized"));
            }
            state.initializing = true;
        }

        let created = match self.inner.create_capture(enable_audio) {
            Ok(created) => created,
            Err(e) => {
                self.inner.state.lock().initializing = false;
                return Err(e);
            }
        };

        let (operation, completer) = AsyncOperation::pending("init");
        let weak = Arc::downgrade(&self.inner);
        let registered = created.then(move |result, created, _status| {
            let outcome = result.and_then(|_| created.get_results());
            match weak.upgrade() {
                Some(inner) => completer.complete(inner.finish_init(outcome, enable_audio)),
                None => {
                    if let Ok(capture) = outcome {
                        if let Err(e) = capture.close() {
                            warn!("Failed to close orphaned capture resource: {}", e);
                        }
                    }
                    completer.complete(Err(RemoteViewError::invalid_state(
                        "session dropped during initialization",
                    )));
                }
            }
        });
        if let Err(e) = registered {
            self.inner.state.lock().initializing = false;
            return Err(e);
        }

        Ok(operation)
    }

    /// Bind a network sink and start recording into it
    ///
    /// With `enable_mrc` the compositing effects are attached first; each
    /// attachment is waited on before start-record is issued. Starting an
    /// already-recording session is a no-op.
    pub fn start_async(
        &self,
        enable_mrc: bool,
        connection: Arc<dyn Connection>,
    ) -> Result<AsyncOperation<()>> {
        let (capture, audio_enabled) = {
            let mut state = self.inner.state.lock();
            if state.stop_waiters.is_some() {
                return Err(RemoteViewError::invalid_state("stop in progress"));
            }
            if state.recording {
                debug!("Session {} already recording", self.inner.handle);
                return Ok(AsyncOperation::ready("start", Ok(())));
            }
            let capture = match (&state.capture, state.initialized) {
                (Some(capture), true) => capture.clone(),
                _ => {
                    return Err(RemoteViewError::invalid_state(format!(
                        "cannot start a session that is {}",
                        state.phase()
                    )));
                }
            };
            if state.starting {
                return Err(RemoteViewError::invalid_state("start already in progress"));
            }
            state.starting = true;
            state.mrc_enabled = enable_mrc;
            state.closed_notified = false;
            (capture, state.audio_enabled)
        };

        info!(
            "Starting session {} (mrc: {}, audio: {}, connection: {})",
            self.inner.handle,
            enable_mrc,
            audio_enabled,
            connection.name()
        );

        match self
            .inner
            .begin_recording(&capture, enable_mrc, audio_enabled, connection)
        {
            Ok(operation) => Ok(operation),
            Err(e) => {
                self.inner.state.lock().starting = false;
                Err(e)
            }
        }
    }

    /// Stop recording and release the capture resource
    ///
    /// When not recording this returns an already-successful operation and
    /// touches nothing. Concurrent calls share the one in-flight stop.
    pub fn stop_async(&self) -> Result<AsyncOperation<()>> {
        let (capture, operation) = {
            let mut state = self.inner.state.lock();
            if !state.recording {
                return Ok(AsyncOperation::ready("stop", Ok(())));
            }
            let (operation, completer) = AsyncOperation::pending("stop");
            if let Some(waiters) = state.stop_waiters.as_mut() {
                debug!("Joining in-flight stop for session {}", self.inner.handle);
                waiters.push(completer);
                return Ok(operation);
            }
            let Some(capture) = state.capture.clone() else {
                return Err(RemoteViewError::invalid_state(
                    "recording without a capture resource",
                ));
            };
            state.stop_waiters = Some(vec![completer]);
            (capture, operation)
        };

        info!("Stopping session {}", self.inner.handle);
        let stopped = capture
            .stop_record()
            .and_then(|stopped| {
                let weak = Arc::downgrade(&self.inner);
                stopped.then(move |result, _, _| {
                    if let Some(inner) = weak.upgrade() {
                        inner.release("stop");
                        inner.complete_stop(result);
                    }
                })
            });

        if let Err(e) = stopped {
            error!("Failed to stop session {}: {}", self.inner.handle, e);
            self.inner.complete_stop(Err(e.clone()));
            return Err(e);
        }
        Ok(operation)
    }

    /// Release the capture resource
    ///
    /// Synchronous and idempotent. Every cleanup step is best-effort.
    pub fn close(&self) -> Result<()> {
        self.inner.release("close");
        Ok(())
    }

    /// Close and retire the session permanently
    pub fn uninitialize(&self) -> Result<()> {
        self.inner.state.lock().retired = true;
        self.inner.release("uninitialize");
        Ok(())
    }

    pub fn spatial_coordinate_system(&self) -> Option<SpatialCoordinateSystem> {
        self.inner.state.lock().spatial
    }

    /// Set the spatial coordinate system and forward it to the bound sink
    pub fn set_spatial_coordinate_system(&self, system: Option<SpatialCoordinateSystem>) {
        let mut state = self.inner.state.lock();
        state.spatial = system;
        if let Some(sink) = &state.sink {
            sink.set_spatial_coordinate_system(system);
        }
    }

    /// Subscribe to capture-lost notifications
    pub fn add_closed<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&Handle) + Send + Sync + 'static,
    {
        self.inner.closed.subscribe(handler)
    }

    /// Unsubscribe from capture-lost notifications
    pub fn remove_closed(&self, token: SubscriptionToken) -> Result<()> {
        self.inner.closed.unsubscribe(token)
    }
}

impl Inner {
    /// Blocking half of init: discovery, negotiation, creation call
    fn create_capture(
        &self,
        enable_audio: bool,
    ) -> Result<AsyncOperation<Arc<dyn CaptureResource>>> {
        let timeout = self.config.discovery_timeout;
        let video = self
            .platform
            .find_first_device(DeviceClass::VideoCapture, timeout)?;
        let audio = if enable_audio {
            Some(
                self.platform
                    .find_first_device(DeviceClass::AudioCapture, timeout)?,
            )
        } else {
            None
        };

        let profiles = self
            .platform
            .profiles
            .video_profiles(&video.id)
            .context("listing video profiles")?;
        let selection = select_profile(&profiles, &self.config);
        if selection.is_none() {
            if self.config.require_profile {
                return Err(RemoteViewError::not_found(format!(
                    "no profile on {} offers {}x{}@{}",
                    video.name,
                    self.config.min_width,
                    self.config.min_height,
                    self.config.frame_rate
                )));
            }
            warn!(
                "No profile on {} offers {}x{}@{}, using the device default",
                video.name, self.config.min_width, self.config.min_height, self.config.frame_rate
            );
        }

        let settings = init_settings(&video, audio.as_ref(), selection.as_ref());
        info!(
            "Initializing {} (audio: {})",
            video.name,
            audio.as_ref().map(|d| d.name.as_str()).unwrap_or("off")
        );
        self.platform.capture.create(&settings)
    }

    /// Completion half of init
    fn finish_init(
        &self,
        created: Result<Arc<dyn CaptureResource>>,
        enable_audio: bool,
    ) -> Result<()> {
        let capture = match created {
            Ok(capture) => capture,
            Err(e) => {
                self.state.lock().initializing = false;
                error!("Capture initialization failed: {}", e);
                return Err(e);
            }
        };

        match capture.video_controller() {
            Ok(controller) => {
                if let Err(e) = controller.set_desired_optimization(self.config.optimization) {
                    warn!("Failed to set optimization hint: {}", e);
                }
                match controller.available_stream_properties(StreamKind::VideoRecord) {
                    Ok(available) => debug!("{} record formats available", available.len()),
                    Err(e) => debug!("Could not list record formats: {}", e),
                }
            }
            Err(e) => warn!("No video controller on capture resource: {}", e),
        }

        let mut state = self.state.lock();
        state.initializing = false;
        if state.retired {
            drop(state);
            if let Err(e) = capture.close() {
                warn!("Failed to close capture resource: {}", e);
            }
            return Err(RemoteViewError::invalid_state(
                "session was uninitialized during initialization",
            ));
        }
        state.capture = Some(capture);
        state.initialized = true;
        state.closed = false;
        state.audio_enabled = enable_audio;
        drop(state);

        info!("Session {} ready", self.handle);
        Ok(())
    }

    /// Blocking half of start: sink, effects, signal handlers, start-record
    fn begin_recording(
        self: &Arc<Self>,
        capture: &Arc<dyn CaptureResource>,
        enable_mrc: bool,
        audio_enabled: bool,
        connection: Arc<dyn Connection>,
    ) -> Result<AsyncOperation<()>> {
        let record = capture
            .video_controller()
            .and_then(|controller| controller.stream_properties(StreamKind::VideoRecord))
            .context("reading record stream properties")?;
        let profile = EncodingProfile::for_capture(record.width, record.height, audio_enabled);
        let sink = self
            .platform
            .sinks
            .create_network_sink(profile.audio.as_ref(), &profile.video, connection)
            .context("creating network sink")?;

        if enable_mrc {
            let policy = self.config.effect_failure_policy;
            let attached = effects::attach(
                "video",
                capture.add_video_effect(&video_effect(&self.config.mrc)),
                self.config.video_effect_timeout,
                policy,
            )?;
            self.mark_effect(capture, StreamKind::VideoRecord, attached);

            if audio_enabled {
                let attached = effects::attach(
                    "audio",
                    capture.add_audio_effect(&audio_effect(self.config.mixer_mode)),
                    self.config.audio_effect_timeout,
                    policy,
                )?;
                self.mark_effect(capture, StreamKind::Audio, attached);
            }
        }

        // Effect waits block; a close may have released the capture meanwhile
        if !self.still_starting(capture) {
            return Err(closed_while_starting());
        }

        let tokens = self.install_signal_handlers(capture)?;

        let started = match capture
            .start_record_to_sink(&profile, sink.clone())
            .context("starting record")
        {
            Ok(started) => started,
            Err(e) => {
                self.drop_signal_handlers(capture, tokens);
                return Err(e);
            }
        };
        let (operation, completer) = AsyncOperation::pending("start");
        let weak = Arc::downgrade(self);
        let for_completion = capture.clone();
        let registered = started.then(move |result, _, _| {
            let outcome = match weak.upgrade() {
                Some(inner) => inner.finish_start(result, &for_completion, sink, tokens),
                None => Err(RemoteViewError::invalid_state("session dropped while starting")),
            };
            completer.complete(outcome);
        });
        if let Err(e) = registered {
            self.drop_signal_handlers(capture, tokens);
            return Err(e);
        }

        Ok(operation)
    }

    fn mark_effect(&self, capture: &Arc<dyn CaptureResource>, stream: StreamKind, attached: bool) {
        if !attached {
            return;
        }
        let mut state = self.state.lock();
        if !state.is_current(capture) {
            return;
        }
        match stream {
            StreamKind::Audio => state.audio_effect_attached = true,
            _ => state.video_effect_attached = true,
        }
    }

    fn still_starting(&self, capture: &Arc<dyn CaptureResource>) -> bool {
        let state = self.state.lock();
        state.starting && state.is_current(capture)
    }

    /// Subscribe the loss handlers and hand their tokens to the state
    ///
    /// Tokens are stored only while `capture` is still the session's
    /// resource, so `release` always unsubscribes them from the right one.
    fn install_signal_handlers(
        self: &Arc<Self>,
        capture: &Arc<dyn CaptureResource>,
    ) -> Result<SignalTokens> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let failed = capture.subscribe_failed(Arc::new(move |failure: &CaptureFailure| {
            if let Some(inner) = weak.upgrade() {
                inner.on_capture_lost(&format!(
                    "capture failed ({:#010x}): {}",
                    failure.code, failure.message
                ));
            }
        }))?;

        let weak: Weak<Inner> = Arc::downgrade(self);
        let limit = match capture.subscribe_record_limit_exceeded(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_capture_lost("record limit exceeded");
            }
        })) {
            Ok(limit) => limit,
            Err(e) => {
                unsubscribe_quietly(capture.as_ref(), Some(failed), None);
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        if !state.starting || !state.is_current(capture) {
            drop(state);
            unsubscribe_quietly(capture.as_ref(), Some(failed), Some(limit));
            return Err(closed_while_starting());
        }
        state.failed_token = Some(failed);
        state.record_limit_token = Some(limit);
        Ok(SignalTokens { failed, limit })
    }

    /// Unsubscribe the loss handlers an aborted start installed
    ///
    /// Once the capture is no longer current, `release` has already taken
    /// and unsubscribed them.
    fn drop_signal_handlers(&self, capture: &Arc<dyn CaptureResource>, installed: SignalTokens) {
        {
            let mut state = self.state.lock();
            let owned = state.is_current(capture)
                && state.failed_token == Some(installed.failed)
                && state.record_limit_token == Some(installed.limit);
            if !owned {
                return;
            }
            state.failed_token = None;
            state.record_limit_token = None;
        }
        unsubscribe_quietly(
            capture.as_ref(),
            Some(installed.failed),
            Some(installed.limit),
        );
    }

    /// Completion half of start
    fn finish_start(
        &self,
        result: Result<()>,
        capture: &Arc<dyn CaptureResource>,
        sink: Arc<dyn NetworkSink>,
        tokens: SignalTokens,
    ) -> Result<()> {
        if let Err(e) = result {
            self.state.lock().starting = false;
            error!("Start record failed for session {}: {}", self.handle, e);
            self.drop_signal_handlers(capture, tokens);
            return Err(e);
        }

        let mut state = self.state.lock();
        state.starting = false;
        if !state.is_current(capture) || !state.initialized {
            drop(state);
            self.drop_signal_handlers(capture, tokens);
            return Err(closed_while_starting());
        }
        sink.set_spatial_coordinate_system(state.spatial);
        state.sink = Some(sink);
        state.recording = true;
        drop(state);

        info!("Session {} recording", self.handle);
        Ok(())
    }

    fn complete_stop(&self, result: Result<()>) {
        let waiters = self.state.lock().stop_waiters.take().unwrap_or_default();
        debug!("Completing {} stop waiter(s)", waiters.len());
        for waiter in waiters {
            waiter.complete(result.clone());
        }
    }

    /// Fire Closed once per recording
    fn on_capture_lost(&self, reason: &str) {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed_notified, true)
        };
        if first {
            warn!("Session {} lost capture: {}", self.handle, reason);
            let notified = self.closed.notify_all(&self.handle);
            debug!("Notified {} closed handler(s)", notified);
        } else {
            debug!("Session {} ignoring repeat loss signal: {}", self.handle, reason);
        }
    }

    /// Take the resource out of the state, then clean it up outside the lock
    ///
    /// Taking the resource is what makes release happen at most once.
    fn release(&self, reason: &str) {
        let released = {
            let mut state = self.state.lock();
            state.recording = false;
            state.sink = None;
            let Some(capture) = state.capture.take() else {
                return;
            };
            state.initialized = false;
            state.closed = true;
            Released {
                capture,
                failed_token: state.failed_token.take(),
                record_limit_token: state.record_limit_token.take(),
                video_effect_attached: std::mem::take(&mut state.video_effect_attached),
                audio_effect_attached: std::mem::take(&mut state.audio_effect_attached),
            }
        };

        debug!("Releasing capture for session {} ({})", self.handle, reason);
        let capture = released.capture;
        unsubscribe_quietly(
            capture.as_ref(),
            released.failed_token,
            released.record_limit_token,
        );
        if released.video_effect_attached {
            clear_effects_quietly(capture.as_ref(), StreamKind::VideoRecord);
        }
        if released.audio_effect_attached {
            clear_effects_quietly(capture.as_ref(), StreamKind::Audio);
        }
        if let Err(e) = capture.close() {
            warn!("Failed to close capture resource: {}", e);
        }
        drop(capture);
        info!("Session {} closed", self.handle);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release("drop");
    }
}

fn unsubscribe_quietly(
    capture: &dyn CaptureResource,
    failed: Option<SubscriptionToken>,
    limit: Option<SubscriptionToken>,
) {
    if let Some(token) = failed {
        if let Err(e) = capture.unsubscribe_failed(token) {
            warn!("Failed to remove capture-failed handler: {}", e);
        }
    }
    if let Some(token) = limit {
        if let Err(e) = capture.unsubscribe_record_limit_exceeded(token) {
            warn!("Failed to remove record-limit handler: {}", e);
        }
    }
}

fn clear_effects_quietly(capture: &dyn CaptureResource, stream: StreamKind) {
    let cleared = capture.clear_effects(stream).and_then(|operation| {
        operation.then(move |result, _, _| {
            if let Err(e) = result {
                warn!("Failed to clear {:?} effects: {}", stream, e);
            }
        })
    });
    if let Err(e) = cleared {
        warn!("Failed to clear {:?} effects: {}", stream, e);
    }
}
