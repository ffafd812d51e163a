//! Error types for invigil-devices

use thiserror::Error;

/// Errors raised while acquiring or playing a capture stream.
///
/// The variants mirror the failure categories a capture backend reports, so
/// callers can decide between surfacing a terminal message and offering a
/// retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The user or platform refused camera access
    #[error("Camera permission denied")]
    PermissionDenied,

    /// No matching capture device exists
    #[error("No capture device found")]
    NotFound,

    /// The device exists but another consumer holds it
    #[error("Capture device busy: {0}")]
    Busy(String),

    /// The requested constraints cannot be met by any device
    #[error("Capture constraints unsatisfiable: {0}")]
    Overconstrained(String),

    /// The backend gave up waiting for the device
    #[error("Capture timed out: {0}")]
    Timeout(String),

    /// Playback on a render surface was refused
    #[error("Playback failed: {0}")]
    Playback(String),

    /// Anything else the backend reports
    #[error("Capture failed: {0}")]
    Other(String),
}

/// Errors raised by a classifier capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    /// The model could not be loaded
    #[error("Model load failed: {0}")]
    Load(String),

    /// A single inference call failed
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Errors raised by an encoder capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    /// The MIME type is not supported by this encoder
    #[error("Unsupported recording format: {0}")]
    UnsupportedFormat(String),

    /// The recorder could not be created or started
    #[error("Recorder failed to start: {0}")]
    Start(String),
}
