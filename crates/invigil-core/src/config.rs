//! Configuration for every integrity component.
//!
//! All sections deserialize with defaults, so a partial JSON document only
//! needs the fields it overrides. Durations are plain integers with a unit
//! suffix in the field name.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use invigil_devices::{CaptureConstraints, FacingMode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IntegrityError, Result};

/// Camera acquisition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub facing_mode: FacingMode,
    pub width: u32,
    pub height: u32,
    /// Upper bound on waiting for the first decodable frame
    pub metadata_timeout_ms: u64,
    /// Wait before a caller-initiated restart re-acquires
    pub restart_grace_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            width: 640,
            height: 480,
            metadata_timeout_ms: 15_000,
            restart_grace_ms: 500,
        }
    }
}

impl CameraConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            facing_mode: self.facing_mode,
            width: self.width,
            height: self.height,
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }
}

/// Prohibited-object detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Sampling cadence
    pub interval_ms: u64,
    /// Raster the frame is downsampled to before inference
    pub raster_width: u32,
    pub raster_height: u32,
    /// Class labels that count as a violation (case-insensitive)
    pub prohibited_classes: Vec<String>,
    /// A prediction counts when its score is strictly above this
    pub confidence_threshold: f32,
    /// Violations needed before the escalation fires
    pub violation_threshold: u32,
    /// Recent detection events kept for diagnostics (0 disables)
    pub history_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            raster_width: 320,
            raster_height: 240,
            prohibited_classes: vec!["cell phone".to_string()],
            confidence_threshold: 0.6,
            violation_threshold: 3,
            history_capacity: 20,
        }
    }
}

impl DetectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn is_prohibited(&self, class: &str) -> bool {
        self.prohibited_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }
}

/// Tab-switch monitoring settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// How long the first-hidden warning flag stays raised
    pub warning_duration_ms: u64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            warning_duration_ms: 3_000,
        }
    }
}

impl VisibilityConfig {
    pub fn warning_duration(&self) -> Duration {
        Duration::from_millis(self.warning_duration_ms)
    }
}

/// Session recording settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub preferred_format: String,
    /// Tried in order when the preferred format is unsupported
    pub fallback_formats: Vec<String>,
    /// Length of one encoded chunk
    pub timeslice_ms: u64,
    /// Recording stops automatically at this elapsed duration
    pub max_duration_secs: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            preferred_format: "video/webm;codecs=vp9".to_string(),
            fallback_formats: vec!["video/webm;codecs=vp8".to_string(), "video/webm".to_string()],
            timeslice_ms: 1_000,
            max_duration_secs: 3_600,
        }
    }
}

impl RecordingConfig {
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    /// Preferred format first, then fallbacks.
    pub fn candidate_formats(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.preferred_format.as_str())
            .chain(self.fallback_formats.iter().map(String::as_str))
    }
}

/// Upload packaging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Expiry hint handed to the storage endpoint
    pub retention_days: u32,
    /// Ask the receiving party to notify its recipient on success
    pub notify_recipient: bool,
    /// Prefix of generated file names
    pub file_prefix: String,
    /// Settled upload tasks kept for diagnostics
    pub task_history: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            notify_recipient: true,
            file_prefix: "session".to_string(),
            task_history: 32,
        }
    }
}

/// Complete integrity configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub visibility: VisibilityConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
}

impl IntegrityConfig {
    /// Defaults overlaid with `INVIGIL_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Load a JSON configuration file and validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: IntegrityConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Overlay values produced by `lookup` (keyed by env var name).
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    warn!(key = key, value = %value, "ignoring unparseable config override");
                    None
                }
            }
        }

        let key = "INVIGIL_METADATA_TIMEOUT_MS";
        if let Some(v) = parse(key, lookup(key)) {
            self.camera.metadata_timeout_ms = v;
        }
        let key = "INVIGIL_DETECTION_INTERVAL_MS";
        if let Some(v) = parse(key, lookup(key)) {
            self.detection.interval_ms = v;
        }
        let key = "INVIGIL_CONFIDENCE_THRESHOLD";
        if let Some(v) = parse(key, lookup(key)) {
            self.detection.confidence_threshold = v;
        }
        let key = "INVIGIL_VIOLATION_THRESHOLD";
        if let Some(v) = parse(key, lookup(key)) {
            self.detection.violation_threshold = v;
        }
        if let Some(classes) = lookup("INVIGIL_PROHIBITED_CLASSES") {
            self.detection.prohibited_classes = classes
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        let key = "INVIGIL_WARNING_DURATION_MS";
        if let Some(v) = parse(key, lookup(key)) {
            self.visibility.warning_duration_ms = v;
        }
        let key = "INVIGIL_MAX_DURATION_SECS";
        if let Some(v) = parse(key, lookup(key)) {
            self.recording.max_duration_secs = v;
        }
        let key = "INVIGIL_RETENTION_DAYS";
        if let Some(v) = parse(key, lookup(key)) {
            self.upload.retention_days = v;
        }
        let key = "INVIGIL_NOTIFY_RECIPIENT";
        if let Some(v) = parse(key, lookup(key)) {
            self.upload.notify_recipient = v;
        }
        self
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(IntegrityError::InvalidConfig(msg.to_string()));

        if self.detection.interval_ms == 0 {
            return invalid("detection.interval_ms must be positive");
        }
        if self.detection.raster_width == 0 || self.detection.raster_height == 0 {
            return invalid("detection raster must be non-empty");
        }
        if self.detection.violation_threshold == 0 {
            return invalid("detection.violation_threshold must be at least 1");
        }
        let t = self.detection.confidence_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return invalid("detection.confidence_threshold must be in (0, 1]");
        }
        if self.detection.prohibited_classes.is_empty() {
            return invalid("detection.prohibited_classes must not be empty");
        }
        if self.recording.timeslice_ms == 0 {
            return invalid("recording.timeslice_ms must be positive");
        }
        if self.recording.max_duration_secs == 0 {
            return invalid("recording.max_duration_secs must be positive");
        }
        if self.recording.preferred_format.is_empty() {
            return invalid("recording.preferred_format must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = IntegrityConfig::default();
        assert_eq!(config.camera.metadata_timeout_ms, 15_000);
        assert_eq!(config.detection.interval_ms, 5_000);
        assert_eq!(
            (config.detection.raster_width, config.detection.raster_height),
            (320, 240)
        );
        assert_eq!(config.visibility.warning_duration_ms, 3_000);
        assert_eq!(config.recording.timeslice_ms, 1_000);
        assert_eq!(config.recording.max_duration_secs, 3_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prohibited_match_is_case_insensitive() {
        let config = DetectionConfig::default();
        assert!(config.is_prohibited("Cell Phone"));
        assert!(!config.is_prohibited("person"));
    }

    #[test]
    fn test_candidate_formats_start_with_preferred() {
        let config = RecordingConfig::default();
        let formats: Vec<_> = config.candidate_formats().collect();
        assert_eq!(formats[0], "video/webm;codecs=vp9");
        assert_eq!(formats.len(), 3);
    }

    #[test]
    fn test_apply_env_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = [
            ("INVIGIL_DETECTION_INTERVAL_MS", "2500"),
            ("INVIGIL_VIOLATION_THRESHOLD", "not-a-number"),
            ("INVIGIL_PROHIBITED_CLASSES", "cell phone, book ,"),
            ("INVIGIL_NOTIFY_RECIPIENT", "false"),
        ]
        .into_iter()
        .collect();

        let config =
            IntegrityConfig::default().apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.detection.interval_ms, 2_500);
        assert_eq!(config.detection.violation_threshold, 3);
        assert_eq!(config.detection.prohibited_classes, vec!["cell phone", "book"]);
        assert!(!config.upload.notify_recipient);
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = IntegrityConfig::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = IntegrityConfig::default();
        config.detection.violation_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("violation_threshold"));

        let mut config = IntegrityConfig::default();
        config.recording.max_duration_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_accepts_partial_documents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"detection": {{"violation_threshold": 5}}, "recording": {{"max_duration_secs": 60}}}}"#
        )
        .unwrap();

        let config = IntegrityConfig::from_file(file.path()).unwrap();
        assert_eq!(config.detection.violation_threshold, 5);
        assert_eq!(config.detection.interval_ms, 5_000);
        assert_eq!(config.recording.max_duration_secs, 60);
    }

    #[test]
    fn test_from_file_reports_path_on_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"detection": {{"interval_ms": 0}}}}"#).unwrap();

        let err = IntegrityConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("interval_ms"));
        assert!(err.to_string().contains("invalid config file"));
    }
}
