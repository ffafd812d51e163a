//! Stream encoding capability.
//!
//! A [`MediaEncoder`] creates one [`MediaRecorder`] per recording cycle. The
//! recorder reports progress through the receiver returned by
//! [`MediaRecorder::start`]; dropping the receiver unsubscribes, dropping the
//! recorder releases the encoder.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::capture::MediaStream;
use crate::error::EncoderError;

/// Events emitted by a running recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// One encoded timeslice
    Data(Vec<u8>),
    /// The encoder failed; no further data follows
    Error(String),
    /// All pending data has been flushed
    Stopped,
}

/// One recording cycle over a stream.
pub trait MediaRecorder: Send {
    /// Begin emitting timesliced data.
    fn start(&mut self) -> Result<mpsc::Receiver<RecorderEvent>, EncoderError>;

    /// Ask the recorder to flush and emit [`RecorderEvent::Stopped`].
    fn request_stop(&mut self);
}

/// Factory for recorders.
pub trait MediaEncoder: Send + Sync {
    /// Whether `mime_type` can be produced by this encoder.
    fn is_supported(&self, mime_type: &str) -> bool;

    fn create(
        &self,
        stream: Arc<dyn MediaStream>,
        mime_type: &str,
        timeslice: Duration,
    ) -> Result<Box<dyn MediaRecorder>, EncoderError>;
}
