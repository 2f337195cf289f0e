use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::encoding::domain::image_encoder::{EncodeError, ImageEncoder};
use crate::shared::frame::Frame;

/// Baseline JPEG through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegImageEncoder;

impl JpegImageEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl ImageEncoder for JpegImageEncoder {
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
        if frame.is_empty() {
            return Err(EncodeError::Empty);
        }
        let color = match frame.channels() {
            1 => ExtendedColorType::L8,
            3 => ExtendedColorType::Rgb8,
            n => return Err(EncodeError::UnsupportedChannels(n)),
        };

        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode(frame.data(), frame.width(), frame.height(), color)
            .map_err(|e| EncodeError::Backend(e.to_string()))?;
        Ok(buf)
    }

    fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }
}
