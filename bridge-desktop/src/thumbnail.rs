//! Thumbnail pipeline backed by the `image` crate

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    media::ImagePipeline,
};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use tracing::debug;

/// Resizes thumbnails into a bounded box and re-encodes them as JPEG.
#[derive(Debug, Clone)]
pub struct ImageThumbnailer {
    max_dimension: u32,
    quality: u8,
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self {
            max_dimension: 480,
            quality: 80,
        }
    }
}

impl ImageThumbnailer {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    fn process_blocking(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(data)
            .map_err(|e| BridgeError::OperationFailed(format!("Unreadable image: {}", e)))?;

        let resized = if decoded.width() > self.max_dimension
            || decoded.height() > self.max_dimension
        {
            decoded.thumbnail(self.max_dimension, self.max_dimension)
        } else {
            decoded
        };

        // JPEG has no alpha channel
        let rgb = resized.to_rgb8();
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(|e| BridgeError::OperationFailed(format!("JPEG encoding failed: {}", e)))?;

        Ok(out.into_inner())
    }
}

#[async_trait]
impl ImagePipeline for ImageThumbnailer {
    async fn process_thumbnail(&self, data: Bytes, mime_type: &str) -> Result<Bytes> {
        if !mime_type.starts_with("image/") {
            return Err(BridgeError::OperationFailed(format!(
                "Not an image: {}",
                mime_type
            )));
        }

        let pipeline = self.clone();
        let input_size = data.len();
        let output = tokio::task::spawn_blocking(move || pipeline.process_blocking(&data))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Thumbnail task failed: {}", e)))??;

        debug!(input_size, output_size = output.len(), "Processed thumbnail");
        Ok(Bytes::from(output))
    }
}
