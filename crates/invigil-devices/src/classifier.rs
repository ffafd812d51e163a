//! Object detection capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::frame::Frame;

/// A single labelled detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label, e.g. "cell phone"
    pub class: String,
    /// Confidence in [0, 1]
    pub score: f32,
}

impl Prediction {
    pub fn new(class: impl Into<String>, score: f32) -> Self {
        Self {
            class: class.into(),
            score,
        }
    }
}

/// A loaded model. Shared read-only across inference passes.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Prediction>, ClassifierError>;
}

/// Loads a [`Classifier`]. Loading is slow and happens once per monitor.
#[async_trait]
pub trait ClassifierLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError>;
}
