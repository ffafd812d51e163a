//! Capture device and live stream capabilities.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::frame::Frame;

/// Which camera to prefer on devices with more than one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Constraints passed to [`CaptureDevice::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub facing_mode: FacingMode,
    /// Ideal width in pixels
    pub width: u32,
    /// Ideal height in pixels
    pub height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            width: 640,
            height: 480,
        }
    }
}

/// A live capture stream.
///
/// Streams are shared by reference: the acquiring component owns the
/// lifecycle and is the only one that may call [`MediaStream::stop`].
#[async_trait]
pub trait MediaStream: Send + Sync + fmt::Debug {
    /// Stable identifier of this stream instance.
    fn id(&self) -> &str;

    /// Whether the stream still carries a live video track.
    fn has_live_video(&self) -> bool;

    /// Stop every track. Idempotent.
    fn stop(&self);

    /// Resolve once the first decodable frame is available.
    ///
    /// Some backends report this late or never; callers bound the wait.
    async fn first_frame(&self);

    /// The most recent frame, if one is available.
    fn current_frame(&self) -> Option<Frame>;
}

/// A camera that can be opened into a [`MediaStream`].
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, DeviceError>;
}
