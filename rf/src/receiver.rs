//! Collaborator traits consumed by the refresh loop
//!
//! The loop asks an [`ImageSizeProvider`] what to request, a
//! [`RefreshDelayProvider`] how long to wait, and hands each response to a
//! [`ReceiveHandler`]. A type implementing all three is an [`ImageReceiver`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tracing::{debug, info};

use crate::image::{Dimension, ImageAndMetadata};

/// Supplies the resolution to request, queried once per cycle
pub trait ImageSizeProvider: Send + Sync {
    fn image_dimension(&self) -> Dimension;
}

/// Supplies the wait before the next scheduled cycle, queried once per re-arm
pub trait RefreshDelayProvider: Send + Sync {
    fn refresh_delay(&self) -> Duration;
}

/// Consumes a completed response
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    /// Handle one response
    ///
    /// Anything still unread on `image.image_stream()` when this returns is
    /// discarded and the connection is closed.
    async fn on_receive(&self, image: ImageAndMetadata<'_>) -> Result<()>;
}

/// All three collaborators in one type
pub trait ImageReceiver: ImageSizeProvider + RefreshDelayProvider + ReceiveHandler {}

impl<T> ImageReceiver for T where T: ImageSizeProvider + RefreshDelayProvider + ReceiveHandler {}

/// A fixed resolution
impl ImageSizeProvider for Dimension {
    fn image_dimension(&self) -> Dimension {
        *self
    }
}

/// A fixed delay
impl RefreshDelayProvider for Duration {
    fn refresh_delay(&self) -> Duration {
        *self
    }
}

/// Handler that reads the whole image payload and discards it
///
/// Keeps running totals so callers can report what was received.
#[derive(Debug, Default)]
pub struct DrainingHandler {
    images: AtomicU64,
    bytes: AtomicU64,
}

impl DrainingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of images fully drained
    pub fn images_received(&self) -> u64 {
        self.images.load(Ordering::SeqCst)
    }

    /// Total image payload bytes drained
    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiveHandler for DrainingHandler {
    async fn on_receive(&self, mut image: ImageAndMetadata<'_>) -> Result<()> {
        debug!(image_byte_size = image.image_byte_size(), "DrainingHandler: draining image");
        let payload = image.read_image().await.context("Failed to read image payload")?;

        self.images.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(payload.len() as u64, Ordering::SeqCst);

        info!(
            bytes = payload.len(),
            metadata_keys = image.metadata().len(),
            "Image received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Metadata;
    use std::io::Cursor;

    #[test]
    fn test_dimension_is_its_own_provider() {
        let dim = Dimension::new(320, 240);
        assert_eq!(dim.image_dimension(), dim);
    }

    #[test]
    fn test_duration_is_its_own_provider() {
        let delay = Duration::from_millis(1500);
        assert_eq!(delay.refresh_delay(), delay);
    }

    #[tokio::test]
    async fn test_draining_handler_counts_bytes() {
        let handler = DrainingHandler::new();
        let mut stream = Cursor::new(vec![7u8; 16]);
        let image = ImageAndMetadata::new(16, 2, Metadata::new(), &mut stream);

        handler.on_receive(image).await.unwrap();
        assert_eq!(handler.images_received(), 1);
        assert_eq!(handler.bytes_received(), 16);
    }

    #[tokio::test]
    async fn test_draining_handler_fails_on_short_payload() {
        let handler = DrainingHandler::new();
        let mut stream = Cursor::new(vec![7u8; 3]);
        let image = ImageAndMetadata::new(16, 2, Metadata::new(), &mut stream);

        assert!(handler.on_receive(image).await.is_err());
        assert_eq!(handler.images_received(), 0);
    }
}
