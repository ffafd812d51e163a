//! Invigil-Devices: Capture, Inference and Encoder Capabilities
//!
//! This crate defines the opaque collaborators the session integrity core
//! consumes. Nothing here knows about assessments, escalation or uploads; it
//! only describes how a camera is opened, how frames are rendered and sampled,
//! how a classifier is loaded and queried, and how a stream is encoded.
//!
//! ## Layer 0 - Capabilities
//!
//! Focus: Narrow async traits with categorised failures.
//!
//! ## Key Components
//!
//! - `CaptureDevice` / `MediaStream`: camera acquisition and the live stream
//! - `RenderSurface` / `OffscreenSink`: where frames are attached for playback
//! - `ClassifierLoader` / `Classifier`: object detection over a `Frame`
//! - `MediaEncoder` / `MediaRecorder`: timesliced recording of a stream
//! - `fakes`: scriptable in-memory implementations of all of the above

pub mod capture;
pub mod classifier;
pub mod encoder;
mod error;
pub mod fakes;
pub mod frame;
pub mod surface;

pub use capture::{CaptureConstraints, CaptureDevice, FacingMode, MediaStream};
pub use classifier::{Classifier, ClassifierLoader, Prediction};
pub use encoder::{MediaEncoder, MediaRecorder, RecorderEvent};
pub use error::{ClassifierError, DeviceError, EncoderError};
pub use frame::Frame;
pub use surface::{OffscreenSink, RenderSurface};

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
