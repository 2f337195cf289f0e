use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("nothing to encode: image has no pixels")]
    Empty,
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),
    #[error("image encoding failed: {0}")]
    Backend(String),
}

/// Compresses a raster into a transmittable byte buffer.
pub trait ImageEncoder: Send + Sync {
    /// `quality` is 1..=100, higher is better.
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError>;

    /// MIME type of the produced bytes.
    fn mime_type(&self) -> &'static str;
}
