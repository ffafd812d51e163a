//! Global atomic counters for integrity observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a session is torn down).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    camera_acquisitions: AtomicU64,
    inference_passes: AtomicU64,
    inference_failures: AtomicU64,
    skipped_passes: AtomicU64,
    violations: AtomicU64,
    escalations: AtomicU64,
    recordings_finalized: AtomicU64,
    uploads_succeeded: AtomicU64,
    uploads_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            camera_acquisitions: AtomicU64::new(0),
            inference_passes: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            skipped_passes: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
            recordings_finalized: AtomicU64::new(0),
            uploads_succeeded: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
        }
    }

    counter!(inc_camera_acquisitions, camera_acquisitions, camera_acquisitions);
    counter!(inc_inference_passes, inference_passes, inference_passes);
    counter!(inc_inference_failures, inference_failures, inference_failures);
    counter!(inc_skipped_passes, skipped_passes, skipped_passes);
    counter!(inc_violations, violations, violations);
    counter!(inc_escalations, escalations, escalations);
    counter!(inc_recordings_finalized, recordings_finalized, recordings_finalized);
    counter!(inc_uploads_succeeded, uploads_succeeded, uploads_succeeded);
    counter!(inc_uploads_failed, uploads_failed, uploads_failed);

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (session teardown) rather than on
    /// every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            camera_acquisitions = self.camera_acquisitions(),
            inference_passes = self.inference_passes(),
            inference_failures = self.inference_failures(),
            skipped_passes = self.skipped_passes(),
            violations = self.violations(),
            escalations = self.escalations(),
            recordings_finalized = self.recordings_finalized(),
            uploads_succeeded = self.uploads_succeeded(),
            uploads_failed = self.uploads_failed(),
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.camera_acquisitions,
            &self.inference_passes,
            &self.inference_failures,
            &self.skipped_passes,
            &self.violations,
            &self.escalations,
            &self.recordings_finalized,
            &self.uploads_succeeded,
            &self.uploads_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.inference_passes(), 0);
        m.inc_inference_passes();
        m.inc_inference_passes();
        assert_eq!(m.inference_passes(), 2);

        m.inc_violations();
        assert_eq!(m.violations(), 1);
        assert_eq!(m.escalations(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_camera_acquisitions();
        m.inc_uploads_failed();
        m.inc_skipped_passes();
        m.reset();
        assert_eq!(m.camera_acquisitions(), 0);
        assert_eq!(m.uploads_failed(), 0);
        assert_eq!(m.skipped_passes(), 0);
    }
}
