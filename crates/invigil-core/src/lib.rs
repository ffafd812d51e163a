//! Invigil Core Library
//!
//! Session integrity monitoring for remote assessments. A
//! [`SessionIntegrityController`] owns one camera acquisition and drives four
//! borrowers of it: a periodic prohibited-object detector, a page visibility
//! watcher, a continuous recorder and an upload coordinator. Escalation signals
//! from the monitors are folded into one decision for the surrounding quiz
//! flow: warn, or force the submission.

pub mod camera;
pub mod cancel;
pub mod config;
pub mod context;
pub mod controller;
pub mod detection;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod recording;
pub mod signal;
pub mod telemetry;
pub mod upload;
pub mod visibility;

pub use camera::{CameraLifecycleManager, CameraState};
pub use cancel::{CancelSource, CancelToken};
pub use config::{
    CameraConfig, DetectionConfig, IntegrityConfig, RecordingConfig, UploadConfig,
    VisibilityConfig,
};
pub use context::{PageVisibility, SessionContext, SessionIds, Visibility};
pub use controller::{
    Capabilities, EscalationSink, IntegrityState, SessionIntegrityController,
};
pub use detection::{DetectionEvent, DetectionMonitor, ModelStatus, ViolationCounter};
pub use error::{CameraError, CameraErrorKind, IntegrityError, RecordingError};
pub use metrics::METRICS;
pub use obs::SessionSpan;
pub use recording::{
    RecordingArtifact, RecordingManager, RecordingState, RecordingStatus, StreamSource,
};
pub use signal::{Escalation, EscalationKind, EscalationSource};
pub use telemetry::init_tracing;
pub use upload::{UploadCoordinator, UploadOutcome, UploadResult, UploadTask};
pub use visibility::{VisibilityMonitor, VisibilityTransition};

/// Invigil version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
