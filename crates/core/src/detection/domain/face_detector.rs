use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Detector output box in source-frame pixels, before any rounding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Snaps to whole pixels. Origins round down and the far edges round up,
    /// so the pixel region never shrinks the detected face.
    pub fn to_region(&self) -> Region {
        let x1 = self.x.floor();
        let y1 = self.y.floor();
        let x2 = (self.x + self.width.max(0.0)).ceil();
        let y2 = (self.y + self.height.max(0.0)).ceil();
        Region::new(
            x1 as i32,
            y1 as i32,
            (x2 - x1) as i32,
            (y2 - y1) as i32,
        )
    }
}

/// One face hypothesis for a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub confidence: f64,
}

/// Domain interface for face detection.
///
/// `timestamp_ms` must strictly increase across calls on one instance;
/// [`DetectionAdapter`](super::detection_adapter::DetectionAdapter) enforces
/// that. Implementations are `&mut self` because inference sessions need
/// exclusive access, but must not keep references to the frame.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        timestamp_ms: u64,
    ) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;
}
