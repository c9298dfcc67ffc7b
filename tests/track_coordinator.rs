mod common;

use common::*;
use screenshare_lib::capture::CaptureSource;
use screenshare_lib::config::CaptureSettings;
use screenshare_lib::error::Error;
use screenshare_lib::session::{Session, SessionStatus};
use screenshare_lib::track::TrackCoordinator;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

struct Fixture {
    engine: Arc<MockEngine>,
    session: Arc<Session>,
    coordinator: TrackCoordinator,
}

fn fixture(capture: MockCapture) -> Fixture {
    let (engine, _events) = MockEngine::new();
    let session = Session::new(Arc::new(config()), engine.clone(), MemoryConnector::new());
    let coordinator = TrackCoordinator::new(
        session.clone(),
        engine.clone(),
        Box::new(capture),
        CaptureSettings::default(),
    );
    Fixture {
        engine,
        session,
        coordinator,
    }
}

fn frames(engine: &MockEngine) -> usize {
    engine.count(&Call::Frame)
}

#[tokio::test(start_paused = true)]
async fn test_start_attaches_track_and_requests_negotiation() {
    let f = fixture(MockCapture::default());
    f.coordinator.start().await.expect("start");

    assert_eq!(f.engine.count(&Call::AddTrack), 1);
    assert!(f.coordinator.is_running());
    timeout(Duration::from_millis(1), f.session.negotiation_requested())
        .await
        .expect("negotiation requested");

    // A second start is a no-op.
    f.coordinator.start().await.expect("start again");
    assert_eq!(f.engine.count(&Call::AddTrack), 1);

    f.coordinator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_paces_at_target_rate() {
    let f = fixture(MockCapture::default());
    f.coordinator.start().await.expect("start");

    sleep(Duration::from_secs(1)).await;
    let n = frames(&f.engine);
    assert!((29..=31).contains(&n), "{n} frames in one second");

    f.coordinator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_capture_is_not_compensated() {
    let capture = MockCapture {
        delay: Duration::from_millis(50),
        ..Default::default()
    };
    let f = fixture(capture);
    f.coordinator.start().await.expect("start");

    sleep(Duration::from_secs(1)).await;
    let n = frames(&f.engine);
    assert!((19..=21).contains(&n), "{n} frames in one second");

    f.coordinator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_capture_error_stops_pacing_but_keeps_session() {
    let capture = MockCapture {
        fail_after: Some(5),
        ..Default::default()
    };
    let closes = capture.closes.clone();
    let f = fixture(capture);
    f.coordinator.start().await.expect("start");

    sleep(Duration::from_secs(1)).await;
    assert_eq!(frames(&f.engine), 5);
    assert!(!f.coordinator.is_running());
    assert_eq!(f.session.status(), SessionStatus::Init);
    assert!(f.session.last_failure().is_none());

    f.coordinator.stop().await;
    assert_eq!(f.engine.count(&Call::RemoveTrack), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let capture = MockCapture::default();
    let closes = capture.closes.clone();
    let f = fixture(capture);
    f.coordinator.start().await.expect("start");
    sleep(Duration::from_millis(200)).await;

    f.coordinator.stop().await;
    let after_stop = frames(&f.engine);
    f.coordinator.stop().await;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(frames(&f.engine), after_stop);
    assert_eq!(f.engine.count(&Call::RemoveTrack), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(!f.coordinator.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_start_is_noop() {
    let capture = MockCapture::default();
    let closes = capture.closes.clone();
    let f = fixture(capture);

    f.coordinator.stop().await;
    assert_eq!(f.engine.count(&Call::RemoveTrack), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capture_open_failure_attaches_nothing() {
    let capture = MockCapture {
        fail_open: true,
        ..Default::default()
    };
    let f = fixture(capture);

    let err = f.coordinator.start().await.unwrap_err();
    assert!(matches!(err, Error::Capture(_)));
    assert_eq!(f.engine.count(&Call::AddTrack), 0);
    assert!(!f.coordinator.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_track_failure_releases_capture() {
    let capture = MockCapture::default();
    let closes = capture.closes.clone();
    let f = fixture(capture);
    f.engine.fail_add_track();

    let err = f.coordinator.start().await.unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(!f.coordinator.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_session_stop_cancels_pacing() {
    let f = fixture(MockCapture::default());
    f.coordinator.start().await.expect("start");
    sleep(Duration::from_millis(100)).await;

    f.session.stop().await;
    let after_stop = frames(&f.engine);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(frames(&f.engine), after_stop);
    assert!(!f.coordinator.is_running());

    f.coordinator.stop().await;
    assert_eq!(f.engine.count(&Call::RemoveTrack), 1);
}

#[tokio::test(start_paused = true)]
async fn test_raw_capture_source_still_streams() {
    let capture = MockCapture {
        raw: true,
        ..Default::default()
    };
    assert!(!capture.encoded());
    let f = fixture(capture);
    f.coordinator.start().await.expect("start");

    sleep(Duration::from_millis(200)).await;
    assert!(frames(&f.engine) > 0);

    f.coordinator.stop().await;
}
