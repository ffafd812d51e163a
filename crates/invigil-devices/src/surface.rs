//! Render surfaces: where a stream is attached for playback.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::capture::MediaStream;
use crate::error::DeviceError;
use crate::lock;

/// Something that renders frames of a bound stream.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Bind a stream (or unbind with `None`).
    fn bind(&self, stream: Option<Arc<dyn MediaStream>>);

    /// The stream currently bound, if any.
    fn bound_stream(&self) -> Option<Arc<dyn MediaStream>>;

    /// Resolve when the bound stream has decodable metadata.
    ///
    /// Never resolves while nothing is bound.
    async fn loaded_metadata(&self) {
        match self.bound_stream() {
            Some(stream) => stream.first_frame().await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Start playback of the bound stream.
    async fn play(&self) -> Result<(), DeviceError>;
}

/// Off-screen consumer that keeps a stream alive until a real surface mounts.
#[derive(Debug, Default)]
pub struct OffscreenSink {
    stream: Mutex<Option<Arc<dyn MediaStream>>>,
}

impl OffscreenSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RenderSurface for OffscreenSink {
    fn bind(&self, stream: Option<Arc<dyn MediaStream>>) {
        match &stream {
            Some(stream) => debug!(stream_id = stream.id(), "offscreen sink holding stream"),
            None => debug!("offscreen sink released stream"),
        }
        *lock(&self.stream) = stream;
    }

    fn bound_stream(&self) -> Option<Arc<dyn MediaStream>> {
        lock(&self.stream).clone()
    }

    async fn play(&self) -> Result<(), DeviceError> {
        match self.bound_stream() {
            Some(stream) if stream.has_live_video() => Ok(()),
            Some(_) => Err(DeviceError::Playback("bound stream has ended".to_string())),
            None => Err(DeviceError::Playback("no stream bound".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeStream;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_offscreen_sink_plays_only_live_streams() {
        let sink = OffscreenSink::new();
        assert!(sink.play().await.is_err());

        let stream = Arc::new(FakeStream::new());
        sink.bind(Some(stream.clone()));
        assert!(sink.play().await.is_ok());

        stream.stop();
        assert!(matches!(sink.play().await, Err(DeviceError::Playback(_))));

        sink.bind(None);
        assert!(sink.bound_stream().is_none());
    }

    #[traced_test]
    #[test]
    fn test_offscreen_sink_logs_hold_and_release() {
        let sink = OffscreenSink::new();
        let stream = Arc::new(FakeStream::new());
        sink.bind(Some(stream.clone()));
        assert!(logs_contain("offscreen sink holding stream"));
        assert!(logs_contain(stream.id()));

        sink.bind(None);
        assert!(logs_contain("offscreen sink released stream"));
    }
}
