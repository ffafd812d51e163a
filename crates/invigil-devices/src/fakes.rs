//! In-memory fakes for device capabilities (testing only)
//!
//! Provides `FakeCaptureDevice`, `FakeStream`, `FakeSurface`,
//! `FakeClassifierLoader`/`FakeClassifier` and `FakeEncoder` that satisfy the
//! capability contracts without any camera, model or codec. Every fake can be
//! scripted to fail and exposes counters for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::capture::{CaptureConstraints, CaptureDevice, MediaStream};
use crate::classifier::{Classifier, ClassifierLoader, Prediction};
use crate::encoder::{MediaEncoder, MediaRecorder, RecorderEvent};
use crate::error::{ClassifierError, DeviceError, EncoderError};
use crate::frame::Frame;
use crate::lock;
use crate::surface::RenderSurface;

// ---------------------------------------------------------------------------
// FakeStream
// ---------------------------------------------------------------------------

/// A stream that serves a fixed frame until stopped.
#[derive(Debug)]
pub struct FakeStream {
    id: String,
    live: AtomicBool,
    video: AtomicBool,
    frame: Mutex<Option<Frame>>,
    /// `None` means metadata never arrives
    metadata_delay: Option<Duration>,
}

impl Default for FakeStream {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStream {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            live: AtomicBool::new(true),
            video: AtomicBool::new(true),
            frame: Mutex::new(Some(Frame::solid(640, 480, [128, 128, 128, 255]))),
            metadata_delay: Some(Duration::ZERO),
        }
    }

    /// How long until the first frame is decodable (`None` = never).
    pub fn with_metadata_delay(mut self, delay: Option<Duration>) -> Self {
        self.metadata_delay = delay;
        self
    }

    pub fn set_frame(&self, frame: Option<Frame>) {
        *lock(&self.frame) = frame;
    }

    pub fn is_stopped(&self) -> bool {
        !self.live.load(Ordering::SeqCst)
    }

    /// End the video track only; the stream itself stays open until stopped.
    pub fn end_video(&self) {
        self.video.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_live_video(&self) -> bool {
        self.live.load(Ordering::SeqCst) && self.video.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    async fn first_frame(&self) {
        match self.metadata_delay {
            Some(delay) if delay.is_zero() => {}
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
    }

    fn current_frame(&self) -> Option<Frame> {
        if !self.has_live_video() {
            return None;
        }
        lock(&self.frame).clone()
    }
}

// ---------------------------------------------------------------------------
// FakeCaptureDevice
// ---------------------------------------------------------------------------

/// Camera whose outcomes are scripted per `open` call.
#[derive(Debug)]
pub struct FakeCaptureDevice {
    failures: Mutex<VecDeque<DeviceError>>,
    open_delay: Duration,
    metadata_delay: Option<Duration>,
    opens: AtomicUsize,
    streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl Default for FakeCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCaptureDevice {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            open_delay: Duration::ZERO,
            metadata_delay: Some(Duration::ZERO),
            opens: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Delay every `open` call (simulates a slow permission prompt).
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Metadata delay applied to every stream this device produces.
    pub fn with_metadata_delay(mut self, delay: Option<Duration>) -> Self {
        self.metadata_delay = delay;
        self
    }

    /// Make the next `open` call fail with `error`.
    pub fn fail_next(&self, error: DeviceError) {
        lock(&self.failures).push_back(error);
    }

    /// Number of `open` calls, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Streams handed out so far.
    pub fn streams(&self) -> Vec<Arc<FakeStream>> {
        lock(&self.streams).clone()
    }

    pub fn last_stream(&self) -> Option<Arc<FakeStream>> {
        lock(&self.streams).last().cloned()
    }
}

#[async_trait]
impl CaptureDevice for FakeCaptureDevice {
    async fn open(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        let stream = Arc::new(FakeStream::new().with_metadata_delay(self.metadata_delay));
        lock(&self.streams).push(stream.clone());
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// FakeSurface
// ---------------------------------------------------------------------------

/// Display surface that records binds and plays.
#[derive(Debug, Default)]
pub struct FakeSurface {
    bound: Mutex<Option<Arc<dyn MediaStream>>>,
    binds: AtomicUsize,
    plays: AtomicUsize,
    play_error: Mutex<Option<DeviceError>>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `play` fail with `error`.
    pub fn fail_play(&self, error: DeviceError) {
        *lock(&self.play_error) = Some(error);
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSurface for FakeSurface {
    fn bind(&self, stream: Option<Arc<dyn MediaStream>>) {
        self.binds.fetch_add(1, Ordering::SeqCst);
        *lock(&self.bound) = stream;
    }

    fn bound_stream(&self) -> Option<Arc<dyn MediaStream>> {
        lock(&self.bound).clone()
    }

    async fn play(&self) -> Result<(), DeviceError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        match lock(&self.play_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeClassifier
// ---------------------------------------------------------------------------

/// Classifier that replays scripted results, then a fallback.
#[derive(Debug, Default)]
pub struct FakeClassifier {
    script: Mutex<VecDeque<Result<Vec<Prediction>, ClassifierError>>>,
    fallback: Mutex<Vec<Prediction>>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    last_frame_size: Mutex<Option<(u32, u32)>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated inference time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue the result for the next unscripted call.
    pub fn push(&self, result: Result<Vec<Prediction>, ClassifierError>) {
        lock(&self.script).push_back(result);
    }

    /// Result returned once the script is exhausted.
    pub fn set_fallback(&self, predictions: Vec<Prediction>) {
        *lock(&self.fallback) = predictions;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `detect` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_frame_size(&self) -> Option<(u32, u32)> {
        *lock(&self.last_frame_size)
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Prediction>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        *lock(&self.last_frame_size) = Some((frame.width(), frame.height()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(lock(&self.fallback).clone()),
        }
    }
}

/// Loader that hands out a shared [`FakeClassifier`] or fails.
#[derive(Debug)]
pub struct FakeClassifierLoader {
    classifier: Arc<FakeClassifier>,
    failure: Option<String>,
    delay: Duration,
    loads: AtomicUsize,
}

impl FakeClassifierLoader {
    pub fn new(classifier: Arc<FakeClassifier>) -> Self {
        Self {
            classifier,
            failure: None,
            delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }

    /// A loader whose every `load` fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(Arc::new(FakeClassifier::new()))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierLoader for FakeClassifierLoader {
    async fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(message) => Err(ClassifierError::Load(message.clone())),
            None => Ok(self.classifier.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeEncoder
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Control {
    Stop,
    Fail(String),
}

#[derive(Debug, Default)]
struct EncoderShared {
    created: AtomicUsize,
    live: AtomicUsize,
    hang_on_stop: AtomicBool,
    fail_start: Mutex<Option<String>>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    last_mime_type: Mutex<Option<String>>,
}

/// Encoder emitting one 16-byte chunk per timeslice and an 8-byte flush.
#[derive(Debug)]
pub struct FakeEncoder {
    supported: Vec<String>,
    shared: Arc<EncoderShared>,
}

impl FakeEncoder {
    pub fn new(supported: &[&str]) -> Self {
        Self {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            shared: Arc::new(EncoderShared::default()),
        }
    }

    /// Supports the usual WebM variants.
    pub fn webm() -> Self {
        Self::new(&["video/webm;codecs=vp9", "video/webm;codecs=vp8", "video/webm"])
    }

    /// When set, `request_stop` never produces `Stopped`.
    pub fn hang_on_stop(&self, hang: bool) {
        self.shared.hang_on_stop.store(hang, Ordering::SeqCst);
    }

    /// Make the next `start` fail with `message`.
    pub fn fail_next_start(&self, message: &str) {
        *lock(&self.shared.fail_start) = Some(message.to_string());
    }

    /// Push an encoder error into the running recorder.
    pub fn inject_error(&self, message: &str) -> bool {
        match lock(&self.shared.control).as_ref() {
            Some(tx) => tx.send(Control::Fail(message.to_string())).is_ok(),
            None => false,
        }
    }

    /// Recorders created so far.
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Recorders not yet dropped.
    pub fn live_recorders(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn last_mime_type(&self) -> Option<String> {
        lock(&self.shared.last_mime_type).clone()
    }
}

impl MediaEncoder for FakeEncoder {
    fn is_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|s| s == mime_type)
    }

    fn create(
        &self,
        stream: Arc<dyn MediaStream>,
        mime_type: &str,
        timeslice: Duration,
    ) -> Result<Box<dyn MediaRecorder>, EncoderError> {
        if !self.is_supported(mime_type) {
            return Err(EncoderError::UnsupportedFormat(mime_type.to_string()));
        }
        if !stream.has_live_video() {
            return Err(EncoderError::Start(
                "stream has no live video track".to_string(),
            ));
        }
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.last_mime_type) = Some(mime_type.to_string());
        Ok(Box::new(FakeRecorder {
            shared: self.shared.clone(),
            timeslice,
            control: None,
        }))
    }
}

struct FakeRecorder {
    shared: Arc<EncoderShared>,
    timeslice: Duration,
    control: Option<mpsc::UnboundedSender<Control>>,
}

impl MediaRecorder for FakeRecorder {
    fn start(&mut self) -> Result<mpsc::Receiver<RecorderEvent>, EncoderError> {
        if self.control.is_some() {
            return Err(EncoderError::Start("recorder already started".to_string()));
        }
        if let Some(message) = lock(&self.shared.fail_start).take() {
            return Err(EncoderError::Start(message));
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *lock(&self.shared.control) = Some(control_tx.clone());
        self.control = Some(control_tx);

        let hang = self.shared.hang_on_stop.load(Ordering::SeqCst);
        tokio::spawn(drive_recorder(event_tx, control_rx, self.timeslice, hang));
        Ok(event_rx)
    }

    fn request_stop(&mut self) {
        if let Some(control) = &self.control {
            let _ = control.send(Control::Stop);
        }
    }
}

impl Drop for FakeRecorder {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        // Release the shared handle so the driver sees its channel close.
        let mut shared_control = lock(&self.shared.control);
        let ours = match (&*shared_control, &self.control) {
            (Some(a), Some(b)) => a.same_channel(b),
            _ => false,
        };
        if ours {
            *shared_control = None;
        }
    }
}

async fn drive_recorder(
    events: mpsc::Sender<RecorderEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
    timeslice: Duration,
    hang_on_stop: bool,
) {
    let mut ticker = interval_at(Instant::now() + timeslice, timeslice);
    let mut seq: u8 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                seq = seq.wrapping_add(1);
                if events.send(RecorderEvent::Data(vec![seq; 16])).await.is_err() {
                    return;
                }
            }
            msg = control.recv() => match msg {
                Some(Control::Stop) if hang_on_stop => {
                    while control.recv().await.is_some() {}
                    return;
                }
                Some(Control::Stop) => {
                    let _ = events.send(RecorderEvent::Data(vec![0xFF; 8])).await;
                    let _ = events.send(RecorderEvent::Stopped).await;
                    return;
                }
                Some(Control::Fail(message)) => {
                    let _ = events.send(RecorderEvent::Error(message)).await;
                    return;
                }
                None => return,
            }
        }
    }
}
