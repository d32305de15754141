//! Integration tests for the capture session state machine

mod mocks;

use mocks::*;
use parking_lot::Mutex;
use remoteview_core::config::{CaptureConfig, EffectFailurePolicy};
use remoteview_core::platform::{CaptureOptimization, DeviceClass, StreamKind};
use remoteview_core::sim::{SimCall, SimOptions, SimPlatform};
use remoteview_core::{
    AsyncStatus, CaptureEngine, Handle, RemoteViewError, SessionPhase, SpatialCoordinateSystem,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_full_lifecycle_releases_everything() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), true);
    assert_eq!(engine.phase(), SessionPhase::Ready);

    wait(&engine.start_async(true, connection("peer")).unwrap()).unwrap();
    let status = engine.status();
    assert_eq!(status.phase, SessionPhase::Recording);
    assert!(status.has_sink);
    assert!(status.video_effect_attached);
    assert!(status.audio_effect_attached);

    wait(&engine.stop_async().unwrap()).unwrap();
    let status = engine.status();
    assert_eq!(status.phase, SessionPhase::Closed);
    assert!(!status.recording);
    assert!(!status.has_capture);
    assert!(!status.has_sink);
    assert!(!status.video_effect_attached);
    assert!(!status.audio_effect_attached);

    engine.close().unwrap();
    engine.close().unwrap();
    engine.uninitialize().unwrap();

    assert_eq!(sim.count_calls(|c| *c == SimCall::CloseCapture), 1);
    assert_eq!(
        sim.count_calls(|c| *c == SimCall::ClearEffects(StreamKind::VideoRecord)),
        1
    );
    assert_eq!(
        sim.count_calls(|c| *c == SimCall::ClearEffects(StreamKind::Audio)),
        1
    );
    assert_eq!(sim.open_captures(), 0);
}

#[test]
fn test_start_before_init_is_invalid_state() {
    let sim = fast_sim(SimOptions::default());
    let engine = engine(&sim);
    let closed = ClosedCounter::default();
    closed.attach(&engine);

    let err = engine.start_async(true, connection("peer")).unwrap_err();
    assert!(matches!(err, RemoteViewError::InvalidState(_)));

    assert!(sim.calls().is_empty());
    assert!(sim.sinks().is_empty());
    assert_eq!(closed.get(), 0);
    assert_eq!(engine.phase(), SessionPhase::Idle);
}

#[test]
fn test_start_after_close_is_invalid_state() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    engine.close().unwrap();
    sim.clear_calls();

    let err = engine.start_async(false, connection("peer")).unwrap_err();
    assert!(matches!(err, RemoteViewError::InvalidState(_)));
    assert!(sim.calls().is_empty());
}

#[test]
fn test_stop_when_not_recording_succeeds_immediately() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    sim.clear_calls();

    let op = engine.stop_async().unwrap();
    assert_eq!(op.status(), AsyncStatus::Completed);
    assert!(op.get_results().is_ok());

    assert!(sim.calls().is_empty());
    assert_eq!(engine.phase(), SessionPhase::Ready);
}

#[test]
fn test_zero_video_devices_is_not_found() {
    let sim = fast_sim(SimOptions::default().with_video_devices(Vec::new()));
    let engine = engine(&sim);

    let err = engine.init_async(false).unwrap_err();
    assert!(matches!(err, RemoteViewError::NotFound(_)));
    assert_eq!(sim.captures_created(), 0);
    assert_eq!(sim.count_calls(|c| matches!(c, SimCall::Create(_))), 0);
    assert!(!engine.is_initialized());
}

#[test]
fn test_missing_audio_device_only_matters_with_audio() {
    let sim = fast_sim(SimOptions::default().with_audio_devices(Vec::new()));

    let err = engine(&sim).init_async(true).unwrap_err();
    assert!(matches!(err, RemoteViewError::NotFound(_)));

    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    assert!(engine.is_initialized());
    assert_eq!(
        sim.count_calls(|c| *c == SimCall::FindAll(DeviceClass::AudioCapture)),
        1
    );
}

#[test]
fn test_first_qualifying_profile_selected() {
    let sim = fast_sim(SimOptions::default().with_profiles(vec![profile(
        "hd",
        vec![description(1920, 1080, 30.0), description(1280, 720, 30.0)],
    )]));
    let engine = ready_engine(&sim, CaptureConfig::default(), false);

    let settings = sim
        .calls()
        .into_iter()
        .find_map(|c| match c {
            SimCall::Create(settings) => Some(settings),
            _ => None,
        })
        .unwrap();
    assert_eq!(settings.video_profile.as_deref(), Some("hd"));
    assert_eq!(settings.record_description, Some(description(1920, 1080, 30.0)));

    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    assert!(sim.calls().contains(&SimCall::CreateSink {
        width: 1920,
        height: 1080,
        audio: false,
        connection: "peer".to_string(),
    }));
}

#[test]
fn test_no_qualifying_profile_uses_device_default() {
    let sim = fast_sim(
        SimOptions::default()
            .with_profiles(vec![profile("slow", vec![description(1920, 1080, 15.0)])]),
    );
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    assert!(engine.is_initialized());

    let created = sim.count_calls(|c| {
        matches!(c, SimCall::Create(settings) if settings.video_profile.is_none())
    });
    assert_eq!(created, 1);
}

#[test]
fn test_required_profile_missing_is_not_found() {
    let sim = fast_sim(SimOptions::default().with_profiles(Vec::new()));
    let engine = CaptureEngine::new(
        sim.platform(),
        CaptureConfig::default().with_require_profile(true),
    );

    let err = engine.init_async(false).unwrap_err();
    assert!(matches!(err, RemoteViewError::NotFound(_)));
    assert_eq!(sim.captures_created(), 0);
}

#[test]
fn test_optimization_hint_applied_on_init() {
    let sim = fast_sim(SimOptions::default());
    ready_engine(&sim, CaptureConfig::default(), false);
    assert!(
        sim.calls()
            .contains(&SimCall::SetOptimization(CaptureOptimization::LatencyThenQuality))
    );
}

#[test]
fn test_effects_attach_in_order_before_start_record() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), true);
    wait(&engine.start_async(true, connection("peer")).unwrap()).unwrap();

    let calls = sim.calls();
    let video = position(&calls, |c| matches!(c, SimCall::AddVideoEffect(_))).unwrap();
    let audio = position(&calls, |c| matches!(c, SimCall::AddAudioEffect(_))).unwrap();
    let subscribe = position(&calls, |c| *c == SimCall::SubscribeFailed).unwrap();
    let start = position(&calls, |c| *c == SimCall::StartRecord).unwrap();
    assert!(video < audio);
    assert!(audio < subscribe);
    assert!(subscribe < start);
}

#[test]
fn test_no_effects_without_mrc() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), true);
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();

    assert_eq!(
        sim.count_calls(|c| matches!(c, SimCall::AddVideoEffect(_) | SimCall::AddAudioEffect(_))),
        0
    );
    let status = engine.status();
    assert!(status.recording);
    assert!(!status.mrc_enabled);
}

#[test]
fn test_audio_effect_failure_continues_recording() {
    let sim = fast_sim(SimOptions::default().with_failing_audio_effect());
    let engine = ready_engine(&sim, CaptureConfig::default(), true);
    wait(&engine.start_async(true, connection("peer")).unwrap()).unwrap();

    let status = engine.status();
    assert!(status.recording);
    assert!(status.video_effect_attached);
    assert!(!status.audio_effect_attached);
    assert_eq!(sim.count_calls(|c| *c == SimCall::StartRecord), 1);

    wait(&engine.stop_async().unwrap()).unwrap();
    assert_eq!(
        sim.count_calls(|c| *c == SimCall::ClearEffects(StreamKind::Audio)),
        0
    );
}

#[test]
fn test_abort_policy_fails_start() {
    let sim = fast_sim(SimOptions::default().with_failing_audio_effect());
    let config = CaptureConfig::default().with_effect_failure_policy(EffectFailurePolicy::Abort);
    let engine = ready_engine(&sim, config, true);

    let err = engine.start_async(true, connection("peer")).unwrap_err();
    assert_eq!(err.code(), remoteview_core::error::CODE_FAIL);
    assert!(err.to_string().contains("audio effect"));

    assert!(!engine.is_recording());
    assert_eq!(sim.count_calls(|c| *c == SimCall::StartRecord), 0);
    assert_eq!(sim.signal_subscribers(), 0);
    // The video effect stays attached until the resource is released
    assert!(engine.status().video_effect_attached);

    engine.close().unwrap();
    assert!(!engine.status().video_effect_attached);
}

#[test]
fn test_stalled_audio_effect_times_out() {
    let sim = fast_sim(SimOptions::default().with_stalled_audio_effect());
    let config =
        CaptureConfig::default().with_audio_effect_timeout(Some(Duration::from_millis(50)));
    let engine = ready_engine(&sim, config, true);

    wait(&engine.start_async(true, connection("peer")).unwrap()).unwrap();
    let status = engine.status();
    assert!(status.recording);
    assert!(!status.audio_effect_attached);
}

#[test]
fn test_start_record_failure_leaves_session_ready() {
    let sim = fast_sim(SimOptions::default().with_failing_start_record());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);

    let op = engine.start_async(false, connection("peer")).unwrap();
    let err = wait(&op).unwrap_err();
    assert!(err.is_session_fatal());

    assert_eq!(engine.phase(), SessionPhase::Ready);
    assert!(!engine.status().has_sink);
    assert_eq!(sim.signal_subscribers(), 0);
}

#[test]
fn test_start_while_recording_is_noop() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();

    let again = engine.start_async(false, connection("other")).unwrap();
    assert_eq!(again.status(), AsyncStatus::Completed);
    assert_eq!(sim.count_calls(|c| *c == SimCall::StartRecord), 1);
    assert_eq!(sim.sinks().len(), 1);
}

#[test]
fn test_failure_signals_notify_closed_once_per_recording() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    let closed = ClosedCounter::default();
    closed.attach(&engine);

    let seen = Arc::new(Mutex::new(Vec::<Handle>::new()));
    let record = seen.clone();
    engine.add_closed(move |handle| record.lock().push(*handle));

    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    assert_eq!(sim.fire_failed(0xC00D_36B4, "device lost"), 1);
    sim.fire_record_limit_exceeded();
    sim.fire_failed(0xC00D_36B4, "device lost");

    assert_eq!(closed.get(), 1);
    assert_eq!(*seen.lock(), vec![engine.handle()]);
    // A loss signal does not force a close
    assert!(engine.is_recording());

    wait(&engine.stop_async().unwrap()).unwrap();
    wait(&engine.init_async(false).unwrap()).unwrap();
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    sim.fire_record_limit_exceeded();
    assert_eq!(closed.get(), 2);
}

#[test]
fn test_close_unsubscribes_failure_signals() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    let closed = ClosedCounter::default();
    closed.attach(&engine);

    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    assert_eq!(sim.signal_subscribers(), 2);

    engine.close().unwrap();
    assert_eq!(sim.signal_subscribers(), 0);
    assert_eq!(sim.fire_failed(1, "late"), 0);
    assert_eq!(closed.get(), 0);
    assert!(!engine.status().has_sink);
}

#[test]
fn test_removed_closed_handler_not_invoked() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    let closed = ClosedCounter::default();
    let token = closed.attach(&engine);
    engine.remove_closed(token).unwrap();
    assert!(matches!(
        engine.remove_closed(token),
        Err(RemoteViewError::NotFound(_))
    ));

    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    sim.fire_failed(1, "lost");
    assert_eq!(closed.get(), 0);
}

#[test]
fn test_concurrent_stops_share_one_stop() {
    let sim = SimPlatform::new(SimOptions::default().with_latency(Duration::from_millis(50)));
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();

    let first = engine.stop_async().unwrap();
    let second = engine.stop_async().unwrap();
    assert_eq!(second.status(), AsyncStatus::Started);

    wait(&first).unwrap();
    wait(&second).unwrap();
    assert_eq!(sim.count_calls(|c| *c == SimCall::StopRecord), 1);
    assert_eq!(sim.count_calls(|c| *c == SimCall::CloseCapture), 1);
}

#[test]
fn test_start_during_stop_is_invalid_state() {
    let sim = SimPlatform::new(SimOptions::default().with_latency(Duration::from_millis(50)));
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();

    let stopping = engine.stop_async().unwrap();
    let result = engine.start_async(false, connection("peer"));
    assert!(matches!(result, Err(RemoteViewError::InvalidState(_))));

    wait(&stopping).unwrap();
    assert_eq!(engine.phase(), SessionPhase::Closed);
    assert_eq!(sim.count_calls(|c| *c == SimCall::StartRecord), 1);
}

#[test]
fn test_close_during_start_releases_handlers() {
    let sim = fast_sim(SimOptions::default().with_stalled_audio_effect());
    let config =
        CaptureConfig::default().with_audio_effect_timeout(Some(Duration::from_millis(300)));
    let engine = ready_engine(&sim, config, true);

    let closer = {
        let engine = engine.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            engine.close().unwrap();
        })
    };
    let result = engine.start_async(true, connection("peer"));
    closer.join().unwrap();

    assert!(matches!(result, Err(RemoteViewError::InvalidState(_))));
    assert_eq!(sim.signal_subscribers(), 0);
    assert_eq!(sim.count_calls(|c| *c == SimCall::StartRecord), 0);

    // A fresh capture must not be handed tokens from the aborted start
    sim.clear_calls();
    wait(&engine.init_async(true).unwrap()).unwrap();
    engine.close().unwrap();
    let unsubscribes = sim.count_calls(|c| {
        matches!(c, SimCall::UnsubscribeFailed | SimCall::UnsubscribeRecordLimit)
    });
    assert_eq!(unsubscribes, 0);
    assert_eq!(sim.open_captures(), 0);
}

#[test]
fn test_spatial_system_pushed_to_sink() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    let first = SpatialCoordinateSystem::from_raw(7);
    engine.set_spatial_coordinate_system(Some(first));

    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    let sink = sim.sinks()[0].clone();
    assert_eq!(sink.spatial_coordinate_system(), Some(first));

    let second = SpatialCoordinateSystem::from_raw(9);
    engine.set_spatial_coordinate_system(Some(second));
    assert_eq!(sink.spatial_coordinate_system(), Some(second));
    assert_eq!(engine.spatial_coordinate_system(), Some(second));

    wait(&engine.stop_async().unwrap()).unwrap();
    engine.set_spatial_coordinate_system(None);
    // The released sink no longer receives updates
    assert_eq!(sink.spatial_coordinate_system(), Some(second));
}

#[test]
fn test_init_state_rules() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);

    let err = engine.init_async(false).unwrap_err();
    assert!(matches!(err, RemoteViewError::InvalidState(_)));

    engine.close().unwrap();
    assert_eq!(engine.phase(), SessionPhase::Closed);
    wait(&engine.init_async(false).unwrap()).unwrap();
    assert_eq!(engine.phase(), SessionPhase::Ready);

    engine.uninitialize().unwrap();
    let err = engine.init_async(false).unwrap_err();
    assert!(matches!(err, RemoteViewError::InvalidState(_)));
    assert_eq!(sim.open_captures(), 0);
}

#[test]
fn test_creation_failure_delivered_on_operation() {
    let sim = fast_sim(SimOptions::default().with_failing_create());
    let engine = engine(&sim);

    let op = engine.init_async(false).unwrap();
    let err = wait(&op).unwrap_err();
    assert!(matches!(err, RemoteViewError::Platform { .. }));
    assert_eq!(op.status(), AsyncStatus::Error);
    assert!(!engine.is_initialized());

    sim.configure(|options| options.fail_create = false);
    wait(&engine.init_async(false).unwrap()).unwrap();
    assert!(engine.is_initialized());
}

#[test]
fn test_dropping_engine_releases_capture() {
    let sim = fast_sim(SimOptions::default());
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    assert_eq!(sim.open_captures(), 1);

    drop(engine);
    assert_eq!(sim.open_captures(), 0);
    assert_eq!(sim.signal_subscribers(), 0);
}

#[test]
fn test_sample_pump_feeds_bound_sink() {
    let sim = fast_sim(SimOptions::default().with_sample_pump(Duration::from_millis(2), 256));
    let engine = ready_engine(&sim, CaptureConfig::default(), false);
    wait(&engine.start_async(false, connection("peer")).unwrap()).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    wait(&engine.stop_async().unwrap()).unwrap();

    let sink = sim.sinks()[0].clone();
    assert!(sink.samples_written() > 0);
    assert_eq!(sink.connection(), "peer");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_async_resolves_to_ready_engine() {
    let sim = fast_sim(SimOptions::default());
    let engine = CaptureEngine::create_async(sim.platform(), CaptureConfig::default(), true)
        .unwrap()
        .join()
        .await
        .unwrap();

    assert_eq!(engine.phase(), SessionPhase::Ready);
    assert!(engine.status().audio_enabled);

    engine
        .start_async(true, connection("peer"))
        .unwrap()
        .join()
        .await
        .unwrap();
    engine.stop_async().unwrap().join().await.unwrap();
    assert_eq!(engine.phase(), SessionPhase::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_operations_chain_with_then() {
    let sim = fast_sim(SimOptions::default());
    let engine = engine(&sim);
    let (tx, rx) = tokio::sync::oneshot::channel();

    engine
        .init_async(false)
        .unwrap()
        .then(move |result, _, status| {
            let _ = tx.send((result.is_ok(), status));
        })
        .unwrap();

    let (ok, status) = rx.await.unwrap();
    assert!(ok);
    assert_eq!(status, AsyncStatus::Completed);
    assert!(engine.is_initialized());
}

#[tokio::test]
async fn test_init_refused_on_current_thread_runtime() {
    let sim = fast_sim(SimOptions::default());
    let engine = engine(&sim);

    let err = engine.init_async(false).unwrap_err();
    assert!(matches!(err, RemoteViewError::InvalidState(_)));
    // A refused init does not leave the session stuck initializing
    let err = engine.init_async(false).unwrap_err();
    assert!(err.to_string().contains("current-thread"));
    assert_eq!(sim.captures_created(), 0);
}
