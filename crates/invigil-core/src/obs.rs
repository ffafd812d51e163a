//! Structured observability hooks for session integrity events.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for lifecycle events: camera state, detection passes,
//!   escalations, integrity transitions, recording finalization and uploads
//!
//! Events carry an `event = "..."` key so they can be filtered from JSON logs.

use tracing::{debug, info, warn};

/// RAII guard that enters a session-scoped tracing span.
///
/// ```ignore
/// let _span = SessionSpan::enter("session-123");
/// // every event below is tagged with session_id = "session-123"
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        let span = tracing::info_span!("invigil.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Build (without entering) the span used for a session's background tasks.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("invigil.session", session_id = %session_id)
}

/// Emit event: camera state changed.
pub fn emit_camera_state(session_id: &str, from: &str, to: &str) {
    info!(event = "camera.state", session_id = %session_id, from = %from, to = %to);
}

/// Emit event: camera acquisition failed (warning level).
pub fn emit_camera_failed(session_id: &str, kind: &str, terminal: bool, error: &dyn std::fmt::Display) {
    warn!(
        event = "camera.failed",
        session_id = %session_id,
        kind = %kind,
        terminal = terminal,
        error = %error,
    );
}

/// Emit event: one inference pass completed.
pub fn emit_detection_pass(session_id: &str, predictions: usize, violation: bool, count: u32) {
    debug!(
        event = "detection.pass",
        session_id = %session_id,
        predictions = predictions,
        violation = violation,
        violation_count = count,
    );
}

/// Emit event: an escalation signal was published.
pub fn emit_escalation(session_id: &str, source: &str, kind: &str) {
    warn!(event = "integrity.escalation", session_id = %session_id, source = %source, kind = %kind);
}

/// Emit event: the integrity state machine moved.
pub fn emit_integrity_transition(session_id: &str, from: &str, to: &str) {
    info!(event = "integrity.transition", session_id = %session_id, from = %from, to = %to);
}

/// Emit event: a recording was finalized.
pub fn emit_recording_finalized(session_id: &str, bytes: usize, chunks: usize, duration_secs: u64) {
    info!(
        event = "recording.finalized",
        session_id = %session_id,
        bytes = bytes,
        chunks = chunks,
        duration_secs = duration_secs,
    );
}

/// Emit event: a recording was aborted (warning level).
pub fn emit_recording_aborted(session_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "recording.aborted", session_id = %session_id, reason = %reason);
}

/// Emit event: an upload attempt settled.
pub fn emit_upload_finished(session_id: &str, success: bool, detail: &str) {
    if success {
        info!(event = "upload.finished", session_id = %session_id, success = true, url = %detail);
    } else {
        warn!(event = "upload.finished", session_id = %session_id, success = false, message = %detail);
    }
}
