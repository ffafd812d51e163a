//! Per-session integrity state machine.
//!
//! `idle -> monitoring -> warned -> forced_submission`. The controller owns
//! every component, routes their escalation signals into one decision and
//! reports it to the surrounding assessment flow through an
//! [`EscalationSink`]. Teardown is reachable from any state.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use invigil_devices::{CaptureDevice, ClassifierLoader, MediaEncoder};
use invigil_storage::StorageEndpoint;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};

use crate::camera::{CameraLifecycleManager, CameraState};
use crate::cancel::{CancelSource, CancelToken};
use crate::config::IntegrityConfig;
use crate::context::SessionContext;
use crate::detection::DetectionMonitor;
use crate::error::{IntegrityError, Result};
use crate::lock;
use crate::metrics::METRICS;
use crate::obs;
use crate::recording::{RecordingManager, StreamSource};
use crate::signal::{Escalation, EscalationSource};
use crate::upload::{UploadCoordinator, UploadResult};
use crate::visibility::VisibilityMonitor;

/// Controller state. Moves only towards `ForcedSubmission` until teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityState {
    #[default]
    Idle,
    Monitoring,
    Warned,
    ForcedSubmission,
}

impl IntegrityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityState::Idle => "idle",
            IntegrityState::Monitoring => "monitoring",
            IntegrityState::Warned => "warned",
            IntegrityState::ForcedSubmission => "forced_submission",
        }
    }
}

impl fmt::Display for IntegrityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The assessment flow's callbacks. Called synchronously, never awaited.
pub trait EscalationSink: Send + Sync {
    fn show_warning(&self, message: &str);
    fn force_submit(&self);
}

/// Opaque collaborators a session needs.
#[derive(Clone)]
pub struct Capabilities {
    pub camera: Arc<dyn CaptureDevice>,
    pub classifier: Arc<dyn ClassifierLoader>,
    pub encoder: Arc<dyn MediaEncoder>,
    pub storage: Arc<dyn StorageEndpoint>,
}

#[derive(Default)]
struct ControllerInner {
    generation: u64,
    run: Option<CancelSource>,
    /// Recording started this run; resumed after a camera interruption
    recording_wanted: bool,
    last_upload: Option<UploadResult>,
}

struct ControllerShared {
    ctx: SessionContext,
    camera: Arc<CameraLifecycleManager>,
    detection: DetectionMonitor,
    visibility: VisibilityMonitor,
    recording: RecordingManager,
    upload: UploadCoordinator,
    sink: Arc<dyn EscalationSink>,
    inner: Mutex<ControllerInner>,
    state_tx: watch::Sender<IntegrityState>,
}

/// Orchestrates camera, detection, visibility, recording and upload.
pub struct SessionIntegrityController {
    shared: Arc<ControllerShared>,
    op_lock: tokio::sync::Mutex<()>,
}

impl SessionIntegrityController {
    pub fn new(
        ctx: SessionContext,
        config: IntegrityConfig,
        capabilities: Capabilities,
        sink: Arc<dyn EscalationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let camera = Arc::new(CameraLifecycleManager::new(
            ctx.clone(),
            config.camera.clone(),
            capabilities.camera,
        ));
        let detection = DetectionMonitor::new(
            ctx.clone(),
            config.detection.clone(),
            camera.clone(),
            capabilities.classifier,
        );
        let visibility = VisibilityMonitor::new(ctx.clone(), config.visibility.clone());
        let recording = RecordingManager::new(ctx.clone(), config.recording.clone(), capabilities.encoder);
        let upload = UploadCoordinator::new(config.upload.clone(), capabilities.storage);
        let (state_tx, _) = watch::channel(IntegrityState::Idle);

        Ok(Self {
            shared: Arc::new(ControllerShared {
                ctx,
                camera,
                detection,
                visibility,
                recording,
                upload,
                sink,
                inner: Mutex::new(ControllerInner::default()),
                state_tx,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Start monitoring.
    ///
    /// Acquires the camera, then enables detection, visibility and recording.
    /// A no-op outside `idle`. A camera failure tears the session back down to
    /// `idle`, shows the camera's message and is returned.
    ///
    /// Recording then follows the camera: a cycle is finalized whenever the
    /// camera leaves `active` and a new one starts when it returns.
    pub async fn enable(&self) -> Result<IntegrityState> {
        let _op = self.op_lock.lock().await;
        let shared = &self.shared;

        let (generation, token, rx) = {
            let mut inner = lock(&shared.inner);
            if self.state() != IntegrityState::Idle {
                return Ok(self.state());
            }
            inner.generation += 1;
            let source = CancelSource::new();
            let token = source.token();
            inner.run = Some(source);
            shared.transition(IntegrityState::Monitoring);

            let (tx, rx) = mpsc::unbounded_channel();
            shared.detection.subscribe(tx.clone());
            shared.visibility.subscribe(tx);
            (inner.generation, token, rx)
        };

        tokio::spawn(
            escalation_loop(Arc::downgrade(shared), generation, rx, token.clone())
                .instrument(obs::session_span(shared.ctx.session_id())),
        );
        shared.visibility.enable();

        let acquired = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(self.state()),
            acquired = shared.camera.enable(None) => acquired,
        };
        if let Err(err) = acquired {
            shared.sink.show_warning(err.user_message());
            shared.teardown();
            return Err(IntegrityError::Camera(err));
        }
        if token.is_cancelled() {
            return Ok(self.state());
        }

        tokio::spawn(
            camera_watch(
                Arc::downgrade(shared),
                generation,
                shared.camera.subscribe_state(),
                token.clone(),
            )
            .instrument(obs::session_span(shared.ctx.session_id())),
        );
        shared.detection.enable();
        let source = StreamSource::camera(shared.camera.clone());
        match shared.recording.start(&source).await {
            Ok(_) => {
                let mut inner = lock(&shared.inner);
                if inner.generation == generation {
                    inner.recording_wanted = true;
                }
            }
            // Monitoring continues without media; submission never depends on it.
            Err(err) => {
                warn!(session_id = %shared.ctx.session_id(), error = %err, "session recording unavailable")
            }
        }
        Ok(self.state())
    }

    /// Stop every component and release the camera. Idempotent.
    pub fn disable(&self) {
        self.shared.teardown();
    }

    pub fn state(&self) -> IntegrityState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<IntegrityState> {
        self.shared.state_tx.subscribe()
    }

    /// Result of the forced-submission upload, once it settles.
    pub fn last_upload(&self) -> Option<UploadResult> {
        lock(&self.shared.inner).last_upload.clone()
    }

    /// One diagnostic line covering every component.
    pub fn status(&self) -> String {
        let shared = &self.shared;
        let recording = shared.recording.status();
        format!(
            "integrity={} camera={} ({}) detection={} violations={} tab_hidden={} recording={} {}s/{}s",
            self.state(),
            shared.camera.state(),
            shared.camera.status_message(),
            shared.detection.status_message(),
            shared.detection.violation_count(),
            shared.visibility.hidden_count(),
            recording.state,
            recording.elapsed_secs,
            recording.max_duration_secs,
        )
    }

    pub fn context(&self) -> &SessionContext {
        &self.shared.ctx
    }

    pub fn camera(&self) -> &Arc<CameraLifecycleManager> {
        &self.shared.camera
    }

    pub fn detection(&self) -> &DetectionMonitor {
        &self.shared.detection
    }

    pub fn visibility(&self) -> &VisibilityMonitor {
        &self.shared.visibility
    }

    pub fn recording(&self) -> &RecordingManager {
        &self.shared.recording
    }

    pub fn upload(&self) -> &UploadCoordinator {
        &self.shared.upload
    }
}

impl Drop for SessionIntegrityController {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl ControllerShared {
    fn state(&self) -> IntegrityState {
        *self.state_tx.borrow()
    }

    fn transition(&self, to: IntegrityState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            obs::emit_integrity_transition(self.ctx.session_id(), from.as_str(), to.as_str());
        }
    }

    fn teardown(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.recording_wanted = false;
            if let Some(run) = inner.run.take() {
                run.cancel();
            }
        }
        self.detection.unsubscribe();
        self.visibility.unsubscribe();
        self.detection.disable();
        self.visibility.disable();
        self.recording.abort();
        self.camera.disable();
        if self.state() != IntegrityState::Idle {
            self.transition(IntegrityState::Idle);
            METRICS.flush();
        }
    }

    fn on_escalation(self: &Arc<Self>, generation: u64, escalation: Escalation) {
        let (from, token) = {
            let inner = lock(&self.inner);
            if inner.generation != generation {
                return;
            }
            let Some(token) = inner.run.as_ref().map(CancelSource::token) else {
                return;
            };
            let from = self.state();
            match from {
                IntegrityState::Monitoring => self.transition(IntegrityState::Warned),
                IntegrityState::Warned if escalation.kind.is_escalation() => {
                    self.transition(IntegrityState::ForcedSubmission)
                }
                _ => {
                    debug!(
                        session_id = %self.ctx.session_id(),
                        state = %from,
                        kind = escalation.kind.name(),
                        "signal does not qualify in current state"
                    );
                    return;
                }
            }
            (from, token)
        };

        if from == IntegrityState::Monitoring {
            if escalation.source == EscalationSource::Detection {
                self.detection.reset_count();
            }
            self.sink.show_warning(&escalation.message());
            return;
        }

        self.detection.disable();
        self.sink.force_submit();
        tokio::spawn(self.clone().finalize_media(generation, token).in_current_span());
    }

    /// Whether this run still steers recording from camera state.
    fn follows_camera(&self, generation: u64) -> bool {
        lock(&self.inner).generation == generation
            && matches!(self.state(), IntegrityState::Monitoring | IntegrityState::Warned)
    }

    /// Keep recording bound to the camera's current stream.
    async fn follow_camera(&self, generation: u64, camera: CameraState) {
        if !self.follows_camera(generation) {
            return;
        }
        let live = camera == CameraState::Active && self.recording.is_source_live();
        if self.recording.is_recording() && !live {
            debug!(session_id = %self.ctx.session_id(), camera = %camera, "recorded stream lost, finalizing recording");
            if let Err(err) = self.recording.stop().await {
                warn!(session_id = %self.ctx.session_id(), error = %err, "interrupted recording did not finalize");
            }
        }

        if camera != CameraState::Active
            || self.recording.is_recording()
            || !self.follows_camera(generation)
            || !lock(&self.inner).recording_wanted
        {
            return;
        }
        let status = self.recording.status();
        if status.elapsed_secs >= status.max_duration_secs {
            return;
        }
        match self.recording.start(&StreamSource::camera(self.camera.clone())).await {
            Ok(_) => info!(session_id = %self.ctx.session_id(), "recording resumed on new camera stream"),
            Err(err) => {
                warn!(session_id = %self.ctx.session_id(), error = %err, "recording could not resume")
            }
        }
    }

    /// Stop the recording and upload it. Runs after submission was forced.
    async fn finalize_media(self: Arc<Self>, generation: u64, token: CancelToken) {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = self.stop_and_upload() => result,
        };
        let mut inner = lock(&self.inner);
        if inner.generation == generation {
            inner.last_upload = Some(result);
        }
    }

    async fn stop_and_upload(&self) -> UploadResult {
        match self.recording.stop().await {
            Ok(Some(artifact)) => self.upload.upload(self.ctx.ids(), &artifact).await,
            Ok(None) => UploadResult::failure("no recording available"),
            Err(err) => UploadResult::failure(format!("recording failed: {err}")),
        }
    }
}

async fn escalation_loop(
    shared: Weak<ControllerShared>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<Escalation>,
    token: CancelToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            received = rx.recv() => received,
        };
        let Some(escalation) = received else {
            return;
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.on_escalation(generation, escalation);
    }
}

async fn camera_watch(
    shared: Weak<ControllerShared>,
    generation: u64,
    mut rx: watch::Receiver<CameraState>,
    token: CancelToken,
) {
    loop {
        let changed = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            changed = rx.changed() => changed,
        };
        if changed.is_err() {
            return;
        }
        let camera = *rx.borrow_and_update();
        let Some(shared) = shared.upgrade() else {
            return;
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = shared.follow_camera(generation, camera) => {}
        }
    }
}
