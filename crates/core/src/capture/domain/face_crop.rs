use std::sync::Arc;

use crate::detection::domain::face_detector::Detection;
use crate::encoding::domain::image_encoder::{EncodeError, ImageEncoder};
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// An encoded, margin-expanded face cut out of one frame.
///
/// The encoded bytes are shared and never mutated, so a crop handed to a
/// submission stays exactly what was captured while scanning continues.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCrop {
    region: Region,
    encoded: Arc<[u8]>,
    timestamp_ms: u64,
    confidence: f64,
}

impl FaceCrop {
    /// Crops `detection` out of `frame` with `margin` pixels of padding,
    /// clamped to the frame, and encodes the result.
    pub fn extract(
        frame: &Frame,
        detection: &Detection,
        margin: u32,
        encoder: &dyn ImageEncoder,
        quality: u8,
    ) -> Result<Self, EncodeError> {
        let region = detection
            .bounding_box
            .to_region()
            .expand_clamped(margin, frame.width(), frame.height());
        if region.is_empty() {
            return Err(EncodeError::Empty);
        }

        let pixels = copy_region(frame, &region);
        let cropped = Frame::new(
            pixels,
            region.width as u32,
            region.height as u32,
            frame.channels(),
            frame.timestamp_ms(),
        );
        let encoded = encoder.encode(&cropped, quality)?;
        if encoded.is_empty() {
            return Err(EncodeError::Empty);
        }

        Ok(Self {
            region,
            encoded: encoded.into(),
            timestamp_ms: frame.timestamp_ms(),
            confidence: detection.confidence,
        })
    }

    /// Wraps bytes encoded elsewhere.
    pub fn from_encoded(
        region: Region,
        encoded: Vec<u8>,
        timestamp_ms: u64,
        confidence: f64,
    ) -> Self {
        Self {
            region,
            encoded: encoded.into(),
            timestamp_ms,
            confidence,
        }
    }

    /// Crop bounds in source-frame pixels.
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn width(&self) -> u32 {
        self.region.width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.region.height.max(0) as u32
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Copies the rows of `region` (already clamped to `frame`) into a new
/// contiguous buffer.
fn copy_region(frame: &Frame, region: &Region) -> Vec<u8> {
    let ch = frame.channels() as usize;
    let stride = frame.width() as usize * ch;
    let row_bytes = region.width as usize * ch;
    let x0 = region.x as usize * ch;

    let mut out = Vec::with_capacity(row_bytes * region.height as usize);
    for y in region.y as usize..(region.y + region.height) as usize {
        let start = y * stride + x0;
        out.extend_from_slice(&frame.data()[start..start + row_bytes]);
    }
    out
}
