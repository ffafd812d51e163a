//! Continuous session recording over the borrowed camera stream.
//!
//! Each start/stop cycle owns one recorder, a collector task draining its
//! events and a ticker task counting elapsed seconds. Finalizing or aborting a
//! cycle drops the recorder and cancels both tasks before another cycle can
//! begin.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use invigil_devices::{MediaEncoder, MediaRecorder, MediaStream, RecorderEvent, RenderSurface};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::camera::CameraLifecycleManager;
use crate::cancel::{CancelSource, CancelToken};
use crate::config::RecordingConfig;
use crate::context::SessionContext;
use crate::error::RecordingError;
use crate::lock;
use crate::metrics::METRICS;
use crate::obs;

/// Recording cycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Stopping,
    Finalized,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Stopping => "stopping",
            RecordingState::Finalized => "finalized",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where `start()` finds the stream to record.
#[derive(Clone)]
pub enum StreamSource {
    /// Accessor returning the current stream
    Provider(Arc<dyn Fn() -> Option<Arc<dyn MediaStream>> + Send + Sync>),
    /// Whatever stream the surface currently has bound
    Surface(Arc<dyn RenderSurface>),
}

impl StreamSource {
    /// Borrow from the camera owner on every resolution.
    pub fn camera(camera: Arc<CameraLifecycleManager>) -> Self {
        StreamSource::Provider(Arc::new(move || camera.stream()))
    }

    fn resolve(&self) -> Option<Arc<dyn MediaStream>> {
        let stream = match self {
            StreamSource::Provider(provider) => provider(),
            StreamSource::Surface(surface) => surface.bound_stream(),
        };
        stream.filter(|s| s.has_live_video())
    }

    fn describe(&self) -> &'static str {
        match self {
            StreamSource::Provider(_) => "stream provider",
            StreamSource::Surface(_) => "display surface",
        }
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A finalized, immutable recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingArtifact {
    pub id: Uuid,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub duration_secs: u64,
    pub chunk_count: usize,
    pub started_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
}

impl RecordingArtifact {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub elapsed_secs: u64,
    pub chunk_count: usize,
    pub max_duration_secs: u64,
    pub mime_type: Option<String>,
}

type CycleOutcome = Option<Result<Arc<RecordingArtifact>, RecordingError>>;

struct ActiveCycle {
    id: u64,
    recorder: Box<dyn MediaRecorder>,
    /// Borrowed for the cycle's lifetime, never stopped here
    stream: Arc<dyn MediaStream>,
    /// Cancels the collector and ticker
    cancel: CancelSource,
    done_tx: watch::Sender<CycleOutcome>,
    mime_type: String,
    started_at: DateTime<Utc>,
    chunks: Vec<Vec<u8>>,
    elapsed_secs: u64,
}

impl ActiveCycle {
    fn settle(self, outcome: Result<Arc<RecordingArtifact>, RecordingError>) {
        self.cancel.cancel();
        self.done_tx.send_replace(Some(outcome));
        // Dropping self releases the recorder.
    }
}

#[derive(Default)]
struct RecordingInner {
    next_cycle: u64,
    cycle: Option<ActiveCycle>,
    last_artifact: Option<Arc<RecordingArtifact>>,
    last_error: Option<RecordingError>,
}

struct RecordingShared {
    ctx: SessionContext,
    config: RecordingConfig,
    encoder: Arc<dyn MediaEncoder>,
    inner: Mutex<RecordingInner>,
    state_tx: watch::Sender<RecordingState>,
}

/// Records the session in timesliced chunks.
pub struct RecordingManager {
    shared: Arc<RecordingShared>,
    op_lock: tokio::sync::Mutex<()>,
}

impl RecordingManager {
    pub fn new(ctx: SessionContext, config: RecordingConfig, encoder: Arc<dyn MediaEncoder>) -> Self {
        let (state_tx, _) = watch::channel(RecordingState::Idle);
        Self {
            shared: Arc::new(RecordingShared {
                ctx,
                config,
                encoder,
                inner: Mutex::new(RecordingInner::default()),
                state_tx,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Begin a recording cycle. A no-op while already recording.
    ///
    /// A cycle still stopping is allowed to finish first.
    pub async fn start(&self, source: &StreamSource) -> Result<RecordingState, RecordingError> {
        let _op = self.op_lock.lock().await;

        let pending = {
            let inner = lock(&self.shared.inner);
            match &inner.cycle {
                Some(_) if self.state() == RecordingState::Recording => {
                    return Ok(RecordingState::Recording)
                }
                Some(cycle) => Some(cycle.done_tx.subscribe()),
                None => None,
            }
        };
        if let Some(mut done) = pending {
            let _ = done.wait_for(Option::is_some).await;
        }

        let result = self.begin_cycle(source);
        if let Err(err) = &result {
            warn!(session_id = %self.shared.ctx.session_id(), error = %err, "recording failed to start");
            lock(&self.shared.inner).last_error = Some(err.clone());
        }
        result
    }

    fn begin_cycle(&self, source: &StreamSource) -> Result<RecordingState, RecordingError> {
        let stream = source.resolve().ok_or_else(|| {
            RecordingError::NoActiveStream(format!(
                "{} has no active stream with a live video track",
                source.describe()
            ))
        })?;

        let encoder = &self.shared.encoder;
        let mime_type = self
            .shared
            .config
            .candidate_formats()
            .find(|format| encoder.is_supported(format))
            .map(str::to_string)
            .ok_or_else(|| {
                RecordingError::NoSupportedFormat(
                    self.shared.config.candidate_formats().collect::<Vec<_>>().join(", "),
                )
            })?;

        let mut recorder =
            encoder.create(stream.clone(), &mime_type, self.shared.config.timeslice())?;
        let events = recorder.start()?;

        let cancel = CancelSource::new();
        let token = cancel.token();
        let (done_tx, _) = watch::channel(None);
        let id = {
            let mut inner = lock(&self.shared.inner);
            inner.next_cycle += 1;
            let id = inner.next_cycle;
            inner.last_error = None;
            inner.cycle = Some(ActiveCycle {
                id,
                recorder,
                stream,
                cancel,
                done_tx,
                mime_type: mime_type.clone(),
                started_at: Utc::now(),
                chunks: Vec::new(),
                elapsed_secs: 0,
            });
            self.shared.set_state(RecordingState::Recording);
            id
        };

        let span = obs::session_span(self.shared.ctx.session_id());
        tokio::spawn(collect(self.shared.clone(), id, events, token.clone()).instrument(span.clone()));
        tokio::spawn(tick(self.shared.clone(), id, token).instrument(span));
        info!(session_id = %self.shared.ctx.session_id(), mime_type = %mime_type, "recording started");
        Ok(RecordingState::Recording)
    }

    /// Stop and wait for the finalized artifact.
    ///
    /// When nothing is recording, resolves immediately with the last artifact.
    pub async fn stop(&self) -> Result<Option<Arc<RecordingArtifact>>, RecordingError> {
        let mut done = {
            let _op = self.op_lock.lock().await;
            let mut guard = lock(&self.shared.inner);
            let inner = &mut *guard;
            let state = self.state();
            match inner.cycle.as_mut() {
                None => return Ok(inner.last_artifact.clone()),
                Some(cycle) => {
                    if state == RecordingState::Recording {
                        cycle.recorder.request_stop();
                        self.shared.set_state(RecordingState::Stopping);
                    }
                    cycle.done_tx.subscribe()
                }
            }
        };

        let outcome = match done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(artifact)) => Ok(Some(artifact)),
            Some(Err(err)) => Err(err),
            None => Err(RecordingError::Aborted),
        }
    }

    /// Tear down the current cycle, discarding buffered data.
    ///
    /// Pending `stop()` callers fail with [`RecordingError::Aborted`].
    pub fn abort(&self) {
        let mut inner = lock(&self.shared.inner);
        if let Some(cycle) = inner.cycle.take() {
            obs::emit_recording_aborted(self.shared.ctx.session_id(), &"aborted by owner");
            cycle.settle(Err(RecordingError::Aborted));
            self.shared.set_state(RecordingState::Idle);
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RecordingState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Whether the current cycle's stream still has a live video track.
    pub fn is_source_live(&self) -> bool {
        lock(&self.shared.inner)
            .cycle
            .as_ref()
            .is_some_and(|cycle| cycle.stream.has_live_video())
    }

    pub fn status(&self) -> RecordingStatus {
        let inner = lock(&self.shared.inner);
        let (elapsed_secs, chunk_count, mime_type) = match &inner.cycle {
            Some(cycle) => (cycle.elapsed_secs, cycle.chunks.len(), Some(cycle.mime_type.clone())),
            None => match &inner.last_artifact {
                Some(artifact) => (
                    artifact.duration_secs,
                    artifact.chunk_count,
                    Some(artifact.mime_type.clone()),
                ),
                None => (0, 0, None),
            },
        };
        RecordingStatus {
            state: self.state(),
            elapsed_secs,
            chunk_count,
            max_duration_secs: self.shared.config.max_duration_secs,
            mime_type,
        }
    }

    pub fn last_artifact(&self) -> Option<Arc<RecordingArtifact>> {
        lock(&self.shared.inner).last_artifact.clone()
    }

    pub fn last_error(&self) -> Option<RecordingError> {
        lock(&self.shared.inner).last_error.clone()
    }
}

impl Drop for RecordingManager {
    fn drop(&mut self) {
        self.abort();
    }
}

impl RecordingShared {
    fn set_state(&self, to: RecordingState) {
        self.state_tx.send_replace(to);
    }

    fn on_data(&self, id: u64, chunk: Vec<u8>) {
        let mut inner = lock(&self.inner);
        if let Some(cycle) = inner.cycle.as_mut().filter(|c| c.id == id) {
            if !chunk.is_empty() {
                cycle.chunks.push(chunk);
            }
        }
    }

    /// The recorder flushed everything: build the artifact.
    fn finalize(&self, id: u64) {
        let mut inner = lock(&self.inner);
        if !inner.cycle.as_ref().is_some_and(|c| c.id == id) {
            return;
        }
        let Some(mut cycle) = inner.cycle.take() else {
            return;
        };
        let chunks = std::mem::take(&mut cycle.chunks);
        let artifact = Arc::new(RecordingArtifact {
            id: Uuid::new_v4(),
            mime_type: cycle.mime_type.clone(),
            chunk_count: chunks.len(),
            bytes: chunks.concat(),
            duration_secs: cycle.elapsed_secs,
            started_at: cycle.started_at,
            finalized_at: Utc::now(),
        });
        inner.last_artifact = Some(artifact.clone());
        cycle.settle(Ok(artifact.clone()));
        self.set_state(RecordingState::Finalized);
        drop(inner);

        METRICS.inc_recordings_finalized();
        obs::emit_recording_finalized(
            self.ctx.session_id(),
            artifact.size(),
            artifact.chunk_count,
            artifact.duration_secs,
        );
    }

    fn fail(&self, id: u64, err: RecordingError) {
        let mut inner = lock(&self.inner);
        if !inner.cycle.as_ref().is_some_and(|c| c.id == id) {
            return;
        }
        if let Some(cycle) = inner.cycle.take() {
            obs::emit_recording_aborted(self.ctx.session_id(), &err);
            inner.last_error = Some(err.clone());
            cycle.settle(Err(err));
            self.set_state(RecordingState::Idle);
        }
    }

    /// Count one second. Returns `false` once the cycle should stop ticking.
    fn on_second(&self, id: u64) -> bool {
        let mut inner = lock(&self.inner);
        let recording = *self.state_tx.borrow() == RecordingState::Recording;
        let Some(cycle) = inner.cycle.as_mut().filter(|c| c.id == id) else {
            return false;
        };
        if !recording {
            return false;
        }
        if !cycle.stream.has_live_video() {
            warn!(
                session_id = %self.ctx.session_id(),
                elapsed_secs = cycle.elapsed_secs,
                "recorded stream ended, finalizing recording"
            );
            cycle.recorder.request_stop();
            self.set_state(RecordingState::Stopping);
            return false;
        }
        cycle.elapsed_secs += 1;
        if cycle.elapsed_secs >= self.config.max_duration_secs {
            debug!(
                session_id = %self.ctx.session_id(),
                max_duration_secs = self.config.max_duration_secs,
                "maximum duration reached, stopping recording"
            );
            cycle.recorder.request_stop();
            self.set_state(RecordingState::Stopping);
            return false;
        }
        true
    }
}

async fn collect(
    shared: Arc<RecordingShared>,
    id: u64,
    mut events: mpsc::Receiver<RecorderEvent>,
    token: CancelToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Some(RecorderEvent::Data(chunk)) => shared.on_data(id, chunk),
            Some(RecorderEvent::Error(message)) => {
                shared.fail(id, RecordingError::Encoder(message));
                return;
            }
            // A closed channel means the recorder is gone; keep what arrived.
            Some(RecorderEvent::Stopped) | None => {
                shared.finalize(id);
                return;
            }
        }
    }
}

async fn tick(shared: Arc<RecordingShared>, id: u64, token: CancelToken) {
    let second = Duration::from_secs(1);
    let mut ticker = interval_at(Instant::now() + second, second);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if !shared.on_second(id) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionIds;
    use invigil_devices::fakes::{FakeEncoder, FakeStream};

    fn manager(encoder: Arc<FakeEncoder>, config: RecordingConfig) -> RecordingManager {
        let (ctx, _page) = SessionContext::new(SessionIds::new("s", "c", "q"));
        RecordingManager::new(ctx, config, encoder)
    }

    fn provider(stream: Arc<FakeStream>) -> StreamSource {
        StreamSource::Provider(Arc::new(move || Some(stream.clone() as Arc<dyn MediaStream>)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_concatenated_chunks() {
        let encoder = Arc::new(FakeEncoder::webm());
        let recorder = manager(encoder.clone(), RecordingConfig::default());
        let stream = Arc::new(FakeStream::new());

        recorder.start(&provider(stream)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(recorder.status().elapsed_secs, 3);

        let artifact = recorder.stop().await.unwrap().unwrap();
        assert_eq!(artifact.chunk_count, 4);
        assert_eq!(artifact.size(), 3 * 16 + 8);
        assert_eq!(artifact.mime_type, "video/webm;codecs=vp9");
        assert_eq!(artifact.duration_secs, 3);
        assert_eq!(recorder.state(), RecordingState::Finalized);
        assert_eq!(encoder.live_recorders(), 0);
    }

    #[tokio::test]
    async fn test_start_without_live_stream_fails_descriptively() {
        let recorder = manager(Arc::new(FakeEncoder::webm()), RecordingConfig::default());
        let stream = Arc::new(FakeStream::new());
        stream.stop();

        let err = recorder.start(&provider(stream)).await.unwrap_err();
        assert!(matches!(err, RecordingError::NoActiveStream(_)));
        assert!(err.to_string().contains("live video track"));
        assert_eq!(recorder.state(), RecordingState::Idle);
        assert_eq!(recorder.last_error(), Some(err));
    }

    #[tokio::test]
    async fn test_falls_back_to_generic_format() {
        let encoder = Arc::new(FakeEncoder::new(&["video/webm"]));
        let recorder = manager(encoder.clone(), RecordingConfig::default());
        recorder
            .start(&provider(Arc::new(FakeStream::new())))
            .await
            .unwrap();
        assert_eq!(encoder.last_mime_type().as_deref(), Some("video/webm"));
        recorder.abort();
    }

    #[tokio::test]
    async fn test_no_supported_format_lists_candidates() {
        let recorder = manager(
            Arc::new(FakeEncoder::new(&["video/mp4"])),
            RecordingConfig::default(),
        );
        let err = recorder
            .start(&provider(Arc::new(FakeStream::new())))
            .await
            .unwrap_err();
        match err {
            RecordingError::NoSupportedFormat(tried) => assert!(tried.contains("vp8")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_surface_source_uses_bound_stream() {
        let recorder = manager(Arc::new(FakeEncoder::webm()), RecordingConfig::default());
        let surface = Arc::new(invigil_devices::OffscreenSink::new());
        let source = StreamSource::Surface(surface.clone());

        assert!(recorder.start(&source).await.is_err());
        surface.bind(Some(Arc::new(FakeStream::new())));
        assert_eq!(
            recorder.start(&source).await.unwrap(),
            RecordingState::Recording
        );
        recorder.abort();
    }
}
