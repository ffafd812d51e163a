//! Periodic prohibited-object detection over the borrowed camera stream.
//!
//! One loop task per enable cycle ticks at the configured cadence. Each tick
//! spawns a pass unless the previous pass is still running, in which case the
//! tick is skipped. While the page is hidden the loop parks and restarts its
//! interval once visible again.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use invigil_devices::{Classifier, ClassifierLoader, Prediction};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn, Instrument};

use crate::camera::{CameraLifecycleManager, CameraState};
use crate::cancel::{CancelSource, CancelToken};
use crate::config::DetectionConfig;
use crate::context::SessionContext;
use crate::lock;
use crate::metrics::METRICS;
use crate::obs;
use crate::signal::{Escalation, EscalationKind, EscalationSource, SignalOutlet};

/// Classifier load status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ModelStatus {
    #[default]
    NotLoaded,
    Loading,
    Ready,
    Failed(String),
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStatus::NotLoaded => write!(f, "Detection model not loaded"),
            ModelStatus::Loading => write!(f, "Loading detection model..."),
            ModelStatus::Ready => write!(f, "Detection model ready"),
            ModelStatus::Failed(reason) => write!(f, "Detection model failed to load: {reason}"),
        }
    }
}

/// Outcome of one inference pass. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub at: DateTime<Utc>,
    pub predictions: Vec<Prediction>,
    pub violation: bool,
}

/// Counts violations and fires once per reset cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationCounter {
    count: u32,
    threshold: u32,
    fired: bool,
}

impl ViolationCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
            fired: false,
        }
    }

    /// Record one violation. Returns `true` exactly when the threshold is
    /// first reached in this cycle.
    pub fn record(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        if !self.fired && self.count >= self.threshold {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.fired = false;
    }
}

struct DetectionInner {
    generation: u64,
    run: Option<CancelSource>,
    model_status: ModelStatus,
    classifier: Option<Arc<dyn Classifier>>,
    counter: ViolationCounter,
    currently_detected: bool,
    history: VecDeque<DetectionEvent>,
}

struct DetectionShared {
    ctx: SessionContext,
    config: DetectionConfig,
    camera: Arc<CameraLifecycleManager>,
    loader: Arc<dyn ClassifierLoader>,
    inner: Mutex<DetectionInner>,
    in_flight: AtomicBool,
    signals: SignalOutlet,
}

/// Samples frames and escalates repeated prohibited-object detections.
pub struct DetectionMonitor {
    shared: Arc<DetectionShared>,
}

impl DetectionMonitor {
    pub fn new(
        ctx: SessionContext,
        config: DetectionConfig,
        camera: Arc<CameraLifecycleManager>,
        loader: Arc<dyn ClassifierLoader>,
    ) -> Self {
        let counter = ViolationCounter::new(config.violation_threshold);
        let capacity = config.history_capacity;
        Self {
            shared: Arc::new(DetectionShared {
                ctx,
                config,
                camera,
                loader,
                inner: Mutex::new(DetectionInner {
                    generation: 0,
                    run: None,
                    model_status: ModelStatus::NotLoaded,
                    classifier: None,
                    counter,
                    currently_detected: false,
                    history: VecDeque::with_capacity(capacity),
                }),
                in_flight: AtomicBool::new(false),
                signals: SignalOutlet::default(),
            }),
        }
    }

    /// Start sampling. Idempotent while enabled.
    ///
    /// Loads the classifier first if needed, then queues until the camera is
    /// active. Load failures are reported through [`Self::model_status`] and
    /// leave the monitor disabled.
    pub fn enable(&self) {
        let (generation, token) = {
            let mut inner = lock(&self.shared.inner);
            if inner.run.is_some() {
                return;
            }
            inner.generation += 1;
            let source = CancelSource::new();
            let token = source.token();
            inner.run = Some(source);
            (inner.generation, token)
        };
        let span = obs::session_span(self.shared.ctx.session_id());
        tokio::spawn(run_loop(self.shared.clone(), generation, token).instrument(span));
    }

    /// Stop sampling and cancel any in-flight pass. The counter is kept.
    pub fn disable(&self) {
        let mut inner = lock(&self.shared.inner);
        inner.generation += 1;
        if let Some(run) = inner.run.take() {
            run.cancel();
        }
        inner.currently_detected = false;
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.shared.inner).run.is_some()
    }

    /// Start a new threshold cycle.
    pub fn reset_count(&self) {
        lock(&self.shared.inner).counter.reset();
    }

    pub fn violation_count(&self) -> u32 {
        lock(&self.shared.inner).counter.count()
    }

    /// Whether the most recent pass found a violation.
    pub fn currently_detected(&self) -> bool {
        lock(&self.shared.inner).currently_detected
    }

    pub fn model_status(&self) -> ModelStatus {
        lock(&self.shared.inner).model_status.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.model_status() == ModelStatus::Loading
    }

    pub fn status_message(&self) -> String {
        self.model_status().to_string()
    }

    /// Most recent passes, oldest first.
    pub fn recent_events(&self) -> Vec<DetectionEvent> {
        lock(&self.shared.inner).history.iter().cloned().collect()
    }

    pub fn subscribe(&self, tx: mpsc::UnboundedSender<Escalation>) {
        self.shared.signals.subscribe(tx);
    }

    pub fn unsubscribe(&self) {
        self.shared.signals.unsubscribe();
    }
}

impl Drop for DetectionMonitor {
    fn drop(&mut self) {
        self.disable();
    }
}

impl DetectionShared {
    fn set_model_status(&self, status: ModelStatus) {
        lock(&self.inner).model_status = status;
    }

    /// Drop the run if it still belongs to `generation`.
    fn end_run(&self, generation: u64) {
        let mut inner = lock(&self.inner);
        if inner.generation == generation {
            inner.run = None;
        }
    }

    fn is_prohibited(&self, prediction: &Prediction) -> bool {
        prediction.score > self.config.confidence_threshold
            && self.config.is_prohibited(&prediction.class)
    }

    /// Fold one pass into the counter. Stale generations are discarded.
    fn record(&self, generation: u64, predictions: Vec<Prediction>) {
        let offending = predictions
            .iter()
            .find(|p| self.is_prohibited(p))
            .map(|p| p.class.clone());
        let violation = offending.is_some();

        let (fire, count) = {
            let mut inner = lock(&self.inner);
            if inner.generation != generation {
                return;
            }
            inner.currently_detected = violation;
            let fire = violation && inner.counter.record();
            let count = inner.counter.count();
            let capacity = self.config.history_capacity;
            if capacity > 0 {
                while inner.history.len() >= capacity {
                    inner.history.pop_front();
                }
                inner.history.push_back(DetectionEvent {
                    at: Utc::now(),
                    predictions: predictions.clone(),
                    violation,
                });
            }
            (fire, count)
        };

        if violation {
            METRICS.inc_violations();
        }
        obs::emit_detection_pass(self.ctx.session_id(), predictions.len(), violation, count);

        if let (true, Some(class)) = (fire, offending) {
            self.signals.publish(
                self.ctx.session_id(),
                Escalation::new(
                    EscalationSource::Detection,
                    EscalationKind::ProhibitedObject { class, count },
                ),
            );
        }
    }
}

async fn load_classifier(
    shared: &DetectionShared,
    generation: u64,
    token: &CancelToken,
) -> Option<Arc<dyn Classifier>> {
    let cached = lock(&shared.inner).classifier.clone();
    if cached.is_some() {
        return cached;
    }
    shared.set_model_status(ModelStatus::Loading);
    let loaded = tokio::select! {
        biased;
        _ = token.cancelled() => {
            shared.set_model_status(ModelStatus::NotLoaded);
            return None;
        }
        loaded = shared.loader.load() => loaded,
    };
    match loaded {
        Ok(classifier) => {
            let mut inner = lock(&shared.inner);
            inner.classifier = Some(classifier.clone());
            inner.model_status = ModelStatus::Ready;
            Some(classifier)
        }
        Err(err) => {
            warn!(session_id = %shared.ctx.session_id(), error = %err, "classifier load failed, detection disabled");
            shared.set_model_status(ModelStatus::Failed(err.to_string()));
            shared.end_run(generation);
            None
        }
    }
}

async fn run_loop(shared: Arc<DetectionShared>, generation: u64, token: CancelToken) {
    let Some(classifier) = load_classifier(&shared, generation, &token).await else {
        return;
    };

    let period = shared.config.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if !shared.camera.is_ready() {
            if !wait_for_camera(&shared, &token).await {
                return;
            }
            ticker.reset();
            continue;
        }

        if !shared.ctx.is_visible() {
            debug!(session_id = %shared.ctx.session_id(), "page hidden, detection paused");
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                visible = shared.ctx.wait_visible() => {
                    if !visible {
                        token.cancelled().await;
                        return;
                    }
                }
            }
            ticker.reset();
            continue;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if !shared.ctx.is_visible() {
            continue;
        }
        if shared.in_flight.swap(true, Ordering::SeqCst) {
            METRICS.inc_skipped_passes();
            debug!(session_id = %shared.ctx.session_id(), "previous pass still running, tick skipped");
            continue;
        }
        tokio::spawn(
            run_pass(shared.clone(), classifier.clone(), generation, token.clone())
                .in_current_span(),
        );
    }
}

/// Queue until the camera is active. Returns `false` on cancellation.
async fn wait_for_camera(shared: &DetectionShared, token: &CancelToken) -> bool {
    debug!(session_id = %shared.ctx.session_id(), "camera not ready, detection queued");
    loop {
        if let Some(stream) = shared.camera.wait_ready(token).await {
            if stream.has_live_video() {
                return true;
            }
        }
        if token.is_cancelled() {
            return false;
        }
        // Failed acquisition or a dead track: wait for the owner to move on.
        let mut state = shared.camera.subscribe_state();
        let current = *state.borrow_and_update();
        if matches!(current, CameraState::Inactive | CameraState::Acquiring) {
            continue;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            changed = state.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Clears the in-flight flag however the pass ends.
struct PassGuard(Arc<DetectionShared>);

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

async fn run_pass(
    shared: Arc<DetectionShared>,
    classifier: Arc<dyn Classifier>,
    generation: u64,
    token: CancelToken,
) {
    let _guard = PassGuard(shared.clone());
    METRICS.inc_inference_passes();

    let frame = shared
        .camera
        .stream()
        .and_then(|stream| stream.current_frame())
        .map(|frame| frame.resample(shared.config.raster_width, shared.config.raster_height));

    let predictions = match frame {
        None => {
            debug!(session_id = %shared.ctx.session_id(), "no frame available, pass counts as no detection");
            Vec::new()
        }
        Some(frame) => {
            let detected = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                detected = classifier.detect(&frame) => detected,
            };
            match detected {
                Ok(predictions) => predictions,
                Err(err) => {
                    METRICS.inc_inference_failures();
                    warn!(session_id = %shared.ctx.session_id(), error = %err, "inference pass failed");
                    Vec::new()
                }
            }
        }
    };

    if token.is_cancelled() {
        return;
    }
    shared.record(generation, predictions);
}
