//! Camera lifecycle: the single owner of the live capture stream.
//!
//! Dependents borrow the stream through [`CameraLifecycleManager::stream`] and
//! must re-query it rather than cache it across a restart. Acquisitions are
//! serialised; `disable()` cancels one in flight and bumps a generation counter
//! so a late continuation can tell it has been superseded.

use std::fmt;
use std::sync::{Arc, Mutex};

use invigil_devices::{
    CaptureConstraints, CaptureDevice, MediaStream, OffscreenSink, RenderSurface,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cancel::{CancelSource, CancelToken};
use crate::config::CameraConfig;
use crate::context::SessionContext;
use crate::error::CameraError;
use crate::lock;
use crate::metrics::METRICS;
use crate::obs;

/// Activation state of the capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    #[default]
    Inactive,
    Acquiring,
    Active,
    Error,
}

impl CameraState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Inactive => "inactive",
            CameraState::Acquiring => "acquiring",
            CameraState::Active => "active",
            CameraState::Error => "error",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct CameraInner {
    generation: u64,
    acquisition: Option<CancelSource>,
    stream: Option<Arc<dyn MediaStream>>,
    last_error: Option<CameraError>,
    constraints: CaptureConstraints,
    /// Real surface when attached, otherwise an off-screen sink
    target: Arc<dyn RenderSurface>,
    surface_attached: bool,
}

/// Acquires, holds and releases the capture stream.
pub struct CameraLifecycleManager {
    ctx: SessionContext,
    config: CameraConfig,
    device: Arc<dyn CaptureDevice>,
    inner: Mutex<CameraInner>,
    state_tx: watch::Sender<CameraState>,
    acquire_lock: tokio::sync::Mutex<()>,
}

impl CameraLifecycleManager {
    pub fn new(ctx: SessionContext, config: CameraConfig, device: Arc<dyn CaptureDevice>) -> Self {
        let (state_tx, _) = watch::channel(CameraState::Inactive);
        let constraints = config.constraints();
        Self {
            ctx,
            config,
            device,
            inner: Mutex::new(CameraInner {
                generation: 0,
                acquisition: None,
                stream: None,
                last_error: None,
                constraints,
                target: Arc::new(OffscreenSink::new()),
                surface_attached: false,
            }),
            state_tx,
            acquire_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Acquire the camera.
    ///
    /// A no-op returning [`CameraState::Active`] when a live stream is already
    /// held. If `disable()` runs while this call is in flight, it returns the
    /// resulting state without error and any stream that arrives late is
    /// stopped.
    pub async fn enable(
        &self,
        constraints: Option<CaptureConstraints>,
    ) -> Result<CameraState, CameraError> {
        let _acquiring = self.acquire_lock.lock().await;

        let (generation, token, constraints) = {
            let mut inner = lock(&self.inner);
            if self.state() == CameraState::Active
                && inner.stream.as_ref().is_some_and(|s| s.has_live_video())
            {
                debug!(session_id = %self.ctx.session_id(), "camera already active");
                return Ok(CameraState::Active);
            }
            if let Some(stale) = inner.stream.take() {
                // Active but the video track died: release before re-acquiring.
                stale.stop();
                inner.target.bind(None);
            }
            if let Some(constraints) = constraints {
                inner.constraints = constraints;
            }
            inner.generation += 1;
            let source = CancelSource::new();
            let token = source.token();
            inner.acquisition = Some(source);
            inner.last_error = None;
            self.set_state(CameraState::Acquiring);
            (inner.generation, token, inner.constraints.clone())
        };

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(self.state()),
            opened = self.device.open(&constraints) => opened,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                let err = CameraError::from(err);
                let mut inner = lock(&self.inner);
                if inner.generation != generation {
                    return Ok(self.state());
                }
                inner.acquisition = None;
                inner.last_error = Some(err.clone());
                self.set_state(CameraState::Error);
                obs::emit_camera_failed(
                    self.ctx.session_id(),
                    &err.kind().to_string(),
                    err.is_terminal(),
                    &err,
                );
                return Err(err);
            }
        };

        let target = {
            let mut inner = lock(&self.inner);
            if inner.generation != generation {
                stream.stop();
                return Ok(self.state());
            }
            inner.stream = Some(stream.clone());
            inner.target.bind(Some(stream));
            inner.target.clone()
        };
        METRICS.inc_camera_acquisitions();

        if !self.await_playback(target.as_ref(), &token).await {
            return Ok(self.state());
        }

        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            return Ok(self.state());
        }
        inner.acquisition = None;
        self.set_state(CameraState::Active);
        Ok(CameraState::Active)
    }

    /// Wait for metadata (bounded) and start playback, both best effort.
    ///
    /// Returns `false` if cancelled.
    async fn await_playback(&self, target: &dyn RenderSurface, token: &CancelToken) -> bool {
        let timeout = self.config.metadata_timeout();
        tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            waited = tokio::time::timeout(timeout, target.loaded_metadata()) => {
                if waited.is_err() {
                    warn!(
                        session_id = %self.ctx.session_id(),
                        timeout_ms = self.config.metadata_timeout_ms,
                        "camera metadata not ready before timeout, attempting playback anyway"
                    );
                }
            }
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            played = target.play() => {
                if let Err(err) = played {
                    warn!(session_id = %self.ctx.session_id(), error = %err, "camera playback failed");
                }
                true
            }
        }
    }

    /// Stop all tracks and release the stream. Idempotent, safe mid-acquisition.
    ///
    /// A failed acquisition holds nothing to release, so its `Error` state and
    /// recorded error survive until the next `enable()`.
    pub fn disable(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        if let Some(acquisition) = inner.acquisition.take() {
            acquisition.cancel();
        }
        if let Some(stream) = inner.stream.take() {
            stream.stop();
            inner.target.bind(None);
        }
        if self.state() == CameraState::Error {
            return;
        }
        inner.last_error = None;
        self.set_state(CameraState::Inactive);
    }

    /// Re-acquire with the last constraints after the grace delay.
    ///
    /// Refuses with the recorded error when it is terminal.
    pub async fn restart(&self) -> Result<CameraState, CameraError> {
        let (error, constraints) = {
            let inner = lock(&self.inner);
            (inner.last_error.clone(), inner.constraints.clone())
        };
        if let Some(err) = error.filter(CameraError::is_terminal) {
            return Err(err);
        }

        self.disable();
        let generation = lock(&self.inner).generation;
        tokio::time::sleep(self.config.restart_grace()).await;
        if lock(&self.inner).generation != generation {
            // Someone else disabled or enabled during the grace delay.
            return Ok(self.state());
        }
        self.enable(Some(constraints)).await
    }

    /// Re-bind the current stream to the render target without re-acquiring.
    ///
    /// Returns `false` when there is no active stream.
    pub async fn force_refresh(&self) -> bool {
        let (stream, target) = {
            let inner = lock(&self.inner);
            match (&inner.stream, self.state()) {
                (Some(stream), CameraState::Active) => (stream.clone(), inner.target.clone()),
                _ => return false,
            }
        };
        target.bind(None);
        target.bind(Some(stream));
        if let Err(err) = target.play().await {
            warn!(session_id = %self.ctx.session_id(), error = %err, "camera playback failed after refresh");
        }
        true
    }

    /// Mount the real display surface, replacing the off-screen sink.
    pub async fn attach_surface(&self, surface: Arc<dyn RenderSurface>) {
        let (previous, stream) = {
            let mut inner = lock(&self.inner);
            let previous = std::mem::replace(&mut inner.target, surface.clone());
            inner.surface_attached = true;
            (previous, inner.stream.clone())
        };
        previous.bind(None);
        if let Some(stream) = stream {
            surface.bind(Some(stream));
            if let Err(err) = surface.play().await {
                warn!(session_id = %self.ctx.session_id(), error = %err, "attached surface failed to play");
            }
        }
    }

    /// Unmount the display surface; an off-screen sink keeps the stream alive.
    pub fn detach_surface(&self) {
        let (previous, sink, stream) = {
            let mut inner = lock(&self.inner);
            if !inner.surface_attached {
                return;
            }
            let sink: Arc<dyn RenderSurface> = Arc::new(OffscreenSink::new());
            let previous = std::mem::replace(&mut inner.target, sink.clone());
            inner.surface_attached = false;
            (previous, sink, inner.stream.clone())
        };
        previous.bind(None);
        if stream.is_some() {
            sink.bind(stream);
        }
    }

    pub fn has_surface(&self) -> bool {
        lock(&self.inner).surface_attached
    }

    /// Borrow the live stream. `None` unless the camera is active.
    pub fn stream(&self) -> Option<Arc<dyn MediaStream>> {
        let inner = lock(&self.inner);
        if self.state() != CameraState::Active {
            return None;
        }
        inner.stream.clone()
    }

    /// Readiness predicate for gating dependents.
    pub fn is_ready(&self) -> bool {
        self.stream().is_some_and(|s| s.has_live_video())
    }

    /// Wait until the camera is active.
    ///
    /// Queues while inactive or acquiring; resolves `None` on cancellation or
    /// when acquisition ends in an error.
    pub async fn wait_ready(&self, token: &CancelToken) -> Option<Arc<dyn MediaStream>> {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                CameraState::Active => return self.stream(),
                CameraState::Error => return None,
                CameraState::Inactive | CameraState::Acquiring => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn state(&self) -> CameraState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CameraState> {
        self.state_tx.subscribe()
    }

    pub fn last_error(&self) -> Option<CameraError> {
        lock(&self.inner).last_error.clone()
    }

    pub fn constraints(&self) -> CaptureConstraints {
        lock(&self.inner).constraints.clone()
    }

    /// Human-readable status, actionable when in error.
    pub fn status_message(&self) -> String {
        match self.state() {
            CameraState::Inactive => "Camera is off.".to_string(),
            CameraState::Acquiring => "Starting camera...".to_string(),
            CameraState::Active => "Camera is active.".to_string(),
            CameraState::Error => match self.last_error() {
                Some(err) => err.user_message().to_string(),
                None => "The camera could not be started. Try again.".to_string(),
            },
        }
    }

    fn set_state(&self, to: CameraState) {
        let mut from = to;
        let changed = self.state_tx.send_if_modified(|state| {
            from = *state;
            if *state == to {
                false
            } else {
                *state = to;
                true
            }
        });
        if changed {
            obs::emit_camera_state(self.ctx.session_id(), from.as_str(), to.as_str());
        }
    }
}

impl Drop for CameraLifecycleManager {
    fn drop(&mut self) {
        if let Some(stream) = lock(&self.inner).stream.take() {
            stream.stop();
        }
    }
}
