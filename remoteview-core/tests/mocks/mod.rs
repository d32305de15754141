//! Mock infrastructure for testing
//!
//! Builders for simulated platforms plus a closed-notification counter.

#![allow(dead_code)]

use remoteview_core::platform::{DeviceClass, DeviceInfo, MediaDescription, VideoProfile};
use remoteview_core::sim::{SimCall, SimConnection, SimOptions, SimPlatform};
use remoteview_core::{AsyncOperation, CaptureConfig, CaptureEngine, Handle, sync_get};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Upper bound for any single wait in tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Block on an operation and return its result
pub fn wait<T: Clone + Send + 'static>(operation: &AsyncOperation<T>) -> remoteview_core::Result<T> {
    sync_get(operation, Some(WAIT))
}

pub fn description(width: u32, height: u32, frame_rate: f64) -> MediaDescription {
    MediaDescription {
        width,
        height,
        frame_rate,
    }
}

pub fn profile(id: &str, descriptions: Vec<MediaDescription>) -> VideoProfile {
    VideoProfile {
        id: id.to_string(),
        record_descriptions: descriptions,
    }
}

pub fn camera(id: &str) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        name: format!("Test camera {}", id),
        class: DeviceClass::VideoCapture,
    }
}

/// Simulated platform with fast completions
pub fn fast_sim(options: SimOptions) -> SimPlatform {
    SimPlatform::new(options.with_latency(Duration::from_millis(1)))
}

/// Engine over `sim` with the default capture policy
pub fn engine(sim: &SimPlatform) -> CaptureEngine {
    CaptureEngine::new(sim.platform(), CaptureConfig::default())
}

/// Engine that has completed init
pub fn ready_engine(sim: &SimPlatform, config: CaptureConfig, audio: bool) -> CaptureEngine {
    let engine = CaptureEngine::new(sim.platform(), config);
    wait(&engine.init_async(audio).expect("init issued")).expect("init completed");
    engine
}

pub fn connection(name: &str) -> Arc<SimConnection> {
    Arc::new(SimConnection::new(name))
}

/// Counts Closed notifications
#[derive(Clone, Default)]
pub struct ClosedCounter {
    count: Arc<AtomicUsize>,
}

impl ClosedCounter {
    pub fn attach(&self, engine: &CaptureEngine) -> remoteview_core::SubscriptionToken {
        let count = self.count.clone();
        engine.add_closed(move |_: &Handle| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Position of the first logged call matching `predicate`
pub fn position(calls: &[SimCall], predicate: impl Fn(&SimCall) -> bool) -> Option<usize> {
    calls.iter().position(|c| predicate(c))
}
