//! Error taxonomy for the integrity core.
//!
//! Device failures are split into terminal (surfaced once, never retried) and
//! transient (retryable by an explicit caller action). Recording failures
//! abort the current cycle. Inference and upload failures never become errors
//! at this level: they are folded into per-pass outcomes and
//! [`crate::upload::UploadResult`] respectively.

use invigil_devices::{DeviceError, EncoderError};
use serde::{Deserialize, Serialize};

/// Failure category of a camera acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    ConstraintsUnsatisfiable,
    Timeout,
    Generic,
}

impl std::fmt::Display for CameraErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CameraErrorKind::PermissionDenied => "permission denied",
            CameraErrorKind::DeviceNotFound => "device not found",
            CameraErrorKind::DeviceBusy => "device busy",
            CameraErrorKind::ConstraintsUnsatisfiable => "constraints unsatisfiable",
            CameraErrorKind::Timeout => "timeout",
            CameraErrorKind::Generic => "generic failure",
        };
        write!(f, "{s}")
    }
}

/// Categorised camera acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera device found")]
    DeviceNotFound,

    #[error("camera busy: {0}")]
    DeviceBusy(String),

    #[error("camera constraints unsatisfiable: {0}")]
    ConstraintsUnsatisfiable(String),

    #[error("camera timed out: {0}")]
    Timeout(String),

    #[error("camera failure: {0}")]
    Generic(String),
}

impl CameraError {
    pub fn kind(&self) -> CameraErrorKind {
        match self {
            CameraError::PermissionDenied => CameraErrorKind::PermissionDenied,
            CameraError::DeviceNotFound => CameraErrorKind::DeviceNotFound,
            CameraError::DeviceBusy(_) => CameraErrorKind::DeviceBusy,
            CameraError::ConstraintsUnsatisfiable(_) => CameraErrorKind::ConstraintsUnsatisfiable,
            CameraError::Timeout(_) => CameraErrorKind::Timeout,
            CameraError::Generic(_) => CameraErrorKind::Generic,
        }
    }

    /// Terminal errors are surfaced once and never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CameraError::PermissionDenied | CameraError::DeviceNotFound
        )
    }

    /// Retryable via an explicit `restart()` after the grace delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CameraError::DeviceBusy(_) | CameraError::Timeout(_))
    }

    /// Message suitable for showing to the candidate.
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied => {
                "Camera access was denied. Allow camera access in your browser settings and reload the page."
            }
            CameraError::DeviceNotFound => {
                "No camera was found. Connect a camera and reload the page."
            }
            CameraError::DeviceBusy(_) => {
                "Your camera is in use by another application. Close it and try again."
            }
            CameraError::ConstraintsUnsatisfiable(_) => {
                "Your camera does not support the required settings."
            }
            CameraError::Timeout(_) => "The camera took too long to start. Try again.",
            CameraError::Generic(_) => "The camera could not be started. Try again.",
        }
    }
}

impl From<DeviceError> for CameraError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied => CameraError::PermissionDenied,
            DeviceError::NotFound => CameraError::DeviceNotFound,
            DeviceError::Busy(detail) => CameraError::DeviceBusy(detail),
            DeviceError::Overconstrained(detail) => CameraError::ConstraintsUnsatisfiable(detail),
            DeviceError::Timeout(detail) => CameraError::Timeout(detail),
            DeviceError::Playback(detail) | DeviceError::Other(detail) => {
                CameraError::Generic(detail)
            }
        }
    }
}

/// Recording cycle failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordingError {
    #[error("no active stream with a live video track: {0}")]
    NoActiveStream(String),

    #[error("no supported recording format (tried {0})")]
    NoSupportedFormat(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("recording aborted before it was finalized")]
    Aborted,
}

impl From<EncoderError> for RecordingError {
    fn from(err: EncoderError) -> Self {
        RecordingError::Encoder(err.to_string())
    }
}

/// Errors surfaced by the integrity controller and configuration layer.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for integrity operations.
pub type Result<T> = std::result::Result<T, IntegrityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_map_to_categories() {
        assert_eq!(
            CameraError::from(DeviceError::PermissionDenied).kind(),
            CameraErrorKind::PermissionDenied
        );
        assert_eq!(
            CameraError::from(DeviceError::NotFound).kind(),
            CameraErrorKind::DeviceNotFound
        );
        assert_eq!(
            CameraError::from(DeviceError::Busy("x".into())).kind(),
            CameraErrorKind::DeviceBusy
        );
        assert_eq!(
            CameraError::from(DeviceError::Overconstrained("x".into())).kind(),
            CameraErrorKind::ConstraintsUnsatisfiable
        );
        assert_eq!(
            CameraError::from(DeviceError::Other("x".into())).kind(),
            CameraErrorKind::Generic
        );
    }

    #[test]
    fn test_terminal_and_retryable_are_disjoint() {
        let all = [
            CameraError::PermissionDenied,
            CameraError::DeviceNotFound,
            CameraError::DeviceBusy(String::new()),
            CameraError::ConstraintsUnsatisfiable(String::new()),
            CameraError::Timeout(String::new()),
            CameraError::Generic(String::new()),
        ];
        for err in all {
            assert!(!(err.is_terminal() && err.is_retryable()), "{err:?}");
        }
        assert!(CameraError::PermissionDenied.is_terminal());
        assert!(CameraError::Timeout("slow".into()).is_retryable());
    }

    #[test]
    fn test_permission_message_is_actionable() {
        let err = CameraError::PermissionDenied;
        assert!(err.to_string().contains("permission denied"));
        assert!(err.user_message().contains("Allow camera access"));
    }

    #[test]
    fn test_integrity_error_wraps_camera_error() {
        let err = IntegrityError::from(CameraError::DeviceNotFound);
        assert!(err.to_string().contains("no camera device found"));
    }
}
