//! Camera acquisition, release and recovery against the fake capture device.

use std::sync::Arc;
use std::time::Duration;

use invigil_core::{
    CameraConfig, CameraError, CameraErrorKind, CameraLifecycleManager, CameraState, CancelSource,
    SessionContext, SessionIds,
};
use invigil_devices::fakes::{FakeCaptureDevice, FakeSurface};
use invigil_devices::{DeviceError, MediaStream, RenderSurface};
use tokio::time::Instant;

fn camera_with(device: Arc<FakeCaptureDevice>) -> Arc<CameraLifecycleManager> {
    let (ctx, _page) = SessionContext::new(SessionIds::new("sess-cam", "cand", "sub"));
    Arc::new(CameraLifecycleManager::new(
        ctx,
        CameraConfig::default(),
        device,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_enable_twice_acquires_once() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device.clone());

    assert_eq!(camera.enable(None).await.unwrap(), CameraState::Active);
    assert_eq!(camera.enable(None).await.unwrap(), CameraState::Active);
    assert_eq!(device.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_enables_share_one_acquisition() {
    let device = Arc::new(FakeCaptureDevice::new().with_open_delay(Duration::from_millis(300)));
    let camera = camera_with(device.clone());

    let (a, b) = tokio::join!(camera.enable(None), camera.enable(None));
    assert_eq!(a.unwrap(), CameraState::Active);
    assert_eq!(b.unwrap(), CameraState::Active);
    assert_eq!(device.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disable_mid_acquisition_cancels_open() {
    let device = Arc::new(FakeCaptureDevice::new().with_open_delay(Duration::from_secs(2)));
    let camera = camera_with(device.clone());

    let pending = tokio::spawn({
        let camera = camera.clone();
        async move { camera.enable(None).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(camera.state(), CameraState::Acquiring);

    camera.disable();
    assert_eq!(pending.await.unwrap().unwrap(), CameraState::Inactive);
    assert_eq!(camera.state(), CameraState::Inactive);
    assert!(device.streams().is_empty());
    assert!(camera.stream().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stream_arriving_after_disable_is_stopped() {
    // Metadata never arrives, so acquisition parks in the metadata wait.
    let device = Arc::new(FakeCaptureDevice::new().with_metadata_delay(None));
    let camera = camera_with(device.clone());

    let pending = tokio::spawn({
        let camera = camera.clone();
        async move { camera.enable(None).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(camera.state(), CameraState::Acquiring);

    camera.disable();
    assert_eq!(pending.await.unwrap().unwrap(), CameraState::Inactive);
    assert!(device.last_stream().unwrap().is_stopped());
    assert!(camera.stream().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_timeout_plays_anyway() {
    let device = Arc::new(FakeCaptureDevice::new().with_metadata_delay(None));
    let camera = camera_with(device.clone());
    let surface = Arc::new(FakeSurface::new());
    camera.attach_surface(surface.clone()).await;

    let started = Instant::now();
    assert_eq!(camera.enable(None).await.unwrap(), CameraState::Active);
    assert!(started.elapsed() >= Duration::from_millis(15_000));
    assert_eq!(surface.play_count(), 1);
    assert!(camera.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_playback_failure_is_not_fatal() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device);
    let surface = Arc::new(FakeSurface::new());
    surface.fail_play(DeviceError::Playback("autoplay blocked".into()));
    camera.attach_surface(surface.clone()).await;

    assert_eq!(camera.enable(None).await.unwrap(), CameraState::Active);
    assert_eq!(surface.play_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_terminal() {
    let device = Arc::new(FakeCaptureDevice::new());
    device.fail_next(DeviceError::PermissionDenied);
    let camera = camera_with(device.clone());

    let err = camera.enable(None).await.unwrap_err();
    assert_eq!(err, CameraError::PermissionDenied);
    assert_eq!(camera.state(), CameraState::Error);
    assert_eq!(
        camera.last_error().map(|e| e.kind()),
        Some(CameraErrorKind::PermissionDenied)
    );
    assert!(camera.status_message().contains("denied"));

    // Nothing retries on its own.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(device.open_count(), 1);

    // And an explicit restart refuses.
    assert_eq!(camera.restart().await.unwrap_err(), CameraError::PermissionDenied);
    assert_eq!(device.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_device_recovers_on_restart_after_grace() {
    let device = Arc::new(FakeCaptureDevice::new());
    device.fail_next(DeviceError::Busy("in use by another app".into()));
    let camera = camera_with(device.clone());

    let err = camera.enable(None).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(camera.state(), CameraState::Error);

    let started = Instant::now();
    assert_eq!(camera.restart().await.unwrap(), CameraState::Active);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(device.open_count(), 2);
    assert!(camera.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disable_is_idempotent_from_any_state() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device.clone());

    camera.disable();
    assert_eq!(camera.state(), CameraState::Inactive);

    camera.enable(None).await.unwrap();
    camera.disable();
    camera.disable();
    assert_eq!(camera.state(), CameraState::Inactive);
    assert!(device.last_stream().unwrap().is_stopped());

    device.fail_next(DeviceError::NotFound);
    assert!(camera.enable(None).await.is_err());
    camera.disable();
    camera.disable();
    assert_eq!(camera.state(), CameraState::Error);
    assert_eq!(camera.last_error(), Some(CameraError::DeviceNotFound));
    assert!(camera.status_message().contains("No camera was found"));

    camera.enable(None).await.unwrap();
    assert_eq!(camera.last_error(), None);
    camera.disable();
    assert_eq!(camera.state(), CameraState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_reacquire_after_dead_track_releases_old_stream() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device.clone());
    let surface = Arc::new(FakeSurface::new());
    camera.attach_surface(surface.clone()).await;
    camera.enable(None).await.unwrap();
    let first = device.last_stream().unwrap();

    first.end_video();
    assert!(!first.is_stopped());
    assert!(!camera.is_ready());

    assert_eq!(camera.enable(None).await.unwrap(), CameraState::Active);
    assert_eq!(device.open_count(), 2);
    assert!(first.is_stopped());

    let second = device.last_stream().unwrap();
    assert_ne!(second.id(), first.id());
    assert!(!second.is_stopped());
    assert_eq!(surface.bound_stream().unwrap().id(), second.id());
    assert_eq!(camera.stream().unwrap().id(), second.id());
}

#[tokio::test(start_paused = true)]
async fn test_late_surface_takes_over_from_offscreen_sink() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device.clone());
    camera.enable(None).await.unwrap();
    let stream = device.last_stream().unwrap();

    let surface = Arc::new(FakeSurface::new());
    camera.attach_surface(surface.clone()).await;
    assert!(camera.has_surface());
    assert_eq!(surface.bound_stream().unwrap().id(), stream.id());
    assert_eq!(surface.play_count(), 1);

    camera.detach_surface();
    assert!(!camera.has_surface());
    assert!(surface.bound_stream().is_none());
    assert!(!stream.is_stopped());
    assert!(camera.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_rebinds_without_reacquiring() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device.clone());
    let surface = Arc::new(FakeSurface::new());
    camera.attach_surface(surface.clone()).await;

    assert!(!camera.force_refresh().await);

    camera.enable(None).await.unwrap();
    let binds = surface.bind_count();
    assert!(camera.force_refresh().await);
    assert_eq!(surface.bind_count(), binds + 2);
    assert_eq!(device.open_count(), 1);
    assert!(surface.bound_stream().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_wait_ready_queues_until_active() {
    let device = Arc::new(FakeCaptureDevice::new().with_open_delay(Duration::from_secs(1)));
    let camera = camera_with(device.clone());
    let source = CancelSource::new();

    let waiter = tokio::spawn({
        let camera = camera.clone();
        let token = source.token();
        async move { camera.wait_ready(&token).await.map(|s| s.id().to_string()) }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    camera.enable(None).await.unwrap();

    let id = waiter.await.unwrap().unwrap();
    assert_eq!(id, device.last_stream().unwrap().id());
}

#[tokio::test(start_paused = true)]
async fn test_wait_ready_resolves_none_on_cancel_or_error() {
    let device = Arc::new(FakeCaptureDevice::new());
    let camera = camera_with(device.clone());

    let source = CancelSource::new();
    let waiter = tokio::spawn({
        let camera = camera.clone();
        let token = source.token();
        async move { camera.wait_ready(&token).await.is_none() }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    source.cancel();
    assert!(waiter.await.unwrap());

    device.fail_next(DeviceError::Overconstrained("1080p".into()));
    let err = camera.enable(None).await.unwrap_err();
    assert_eq!(err.kind(), CameraErrorKind::ConstraintsUnsatisfiable);
    let live = CancelSource::new();
    assert!(camera.wait_ready(&live.token()).await.is_none());
}
