use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;
use thiserror::Error;

use super::face_detector::{Detection, FaceDetector};
use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
    #[error("could not obtain detection model: {0}")]
    Resolve(String),
    #[error("could not start detection runtime: {0}")]
    Runtime(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("detector is not initialized")]
    NotInitialized,
    #[error("frame has no pixel data")]
    EmptyFrame,
    #[error("face detection failed: {0}")]
    Inference(String),
}

pub type LoadResult = Result<Box<dyn FaceDetector>, ModelLoadError>;

/// Builds a ready detector. Called off the event loop thread, so loaders may
/// block on downloads and runtime start-up.
pub trait DetectorLoader: Send + Sync {
    fn load(&self) -> LoadResult;
}

/// Runs `loader` on a background thread and delivers its result once.
pub fn load_in_background(loader: Arc<dyn DetectorLoader>) -> Receiver<LoadResult> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(loader.load());
    });
    rx
}

/// Owns one detector instance for one capture session.
///
/// Lifecycle is explicit: [`install`](Self::install) (or
/// [`initialize`](Self::initialize)) before use, [`dispose`](Self::dispose)
/// when the session ends. Timestamps handed to the detector strictly
/// increase; a repeated or backwards timestamp is bumped to one past the
/// previous call.
#[derive(Default)]
pub struct DetectionAdapter {
    detector: Option<Box<dyn FaceDetector>>,
    last_timestamp_ms: Option<u64>,
}

impl DetectionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads synchronously through `loader`.
    pub fn initialize(&mut self, loader: &dyn DetectorLoader) -> Result<(), ModelLoadError> {
        self.install(loader.load())
    }

    /// Accepts the outcome of a (possibly background) load.
    pub fn install(&mut self, result: LoadResult) -> Result<(), ModelLoadError> {
        let detector = result?;
        self.detector = Some(detector);
        self.last_timestamp_ms = None;
        log::info!("Face detector ready");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_some()
    }

    /// Returns detections in detector order; empty when no face is found.
    pub fn detect(
        &mut self,
        frame: &Frame,
        timestamp_ms: u64,
    ) -> Result<Vec<Detection>, DetectionError> {
        let detector = self
            .detector
            .as_mut()
            .ok_or(DetectionError::NotInitialized)?;
        if frame.is_empty() {
            return Err(DetectionError::EmptyFrame);
        }

        let ts = match self.last_timestamp_ms {
            Some(last) if timestamp_ms <= last => {
                log::debug!("Timestamp {timestamp_ms} not after {last}, using {}", last + 1);
                last + 1
            }
            _ => timestamp_ms,
        };
        self.last_timestamp_ms = Some(ts);

        detector
            .detect(frame, ts)
            .map_err(|e| DetectionError::Inference(e.to_string()))
    }

    /// Drops the detector. Idempotent.
    pub fn dispose(&mut self) {
        if self.detector.take().is_some() {
            log::debug!("Face detector disposed");
        }
        self.last_timestamp_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_detector::BoundingBox;
    use std::sync::Mutex;

    /// Records every timestamp it is called with and returns a fixed result.
    struct RecordingDetector {
        seen: Arc<Mutex<Vec<u64>>>,
        detections: Vec<Detection>,
        fail: bool,
    }

    impl FaceDetector for RecordingDetector {
        fn detect(
            &mut self,
            _frame: &Frame,
            timestamp_ms: u64,
        ) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
            self.seen.lock().unwrap().push(timestamp_ms);
            if self.fail {
                return Err("session crashed".into());
            }
            Ok(self.detections.clone())
        }
    }

    struct StubLoader {
        fail: bool,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl DetectorLoader for StubLoader {
        fn load(&self) -> LoadResult {
            if self.fail {
                return Err(ModelLoadError::Resolve("offline".to_string()));
            }
            Ok(Box::new(RecordingDetector {
                seen: self.seen.clone(),
                detections: vec![Detection {
                    bounding_box: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
                    confidence: 0.9,
                }],
                fail: false,
            }))
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, 3, 0)
    }

    fn ready_adapter() -> (DetectionAdapter, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut adapter = DetectionAdapter::new();
        adapter
            .initialize(&StubLoader {
                fail: false,
                seen: seen.clone(),
            })
            .unwrap();
        (adapter, seen)
    }

    #[test]
    fn test_detect_before_initialize_fails() {
        let mut adapter = DetectionAdapter::new();
        assert_eq!(adapter.detect(&frame(), 0), Err(DetectionError::NotInitialized));
    }

    #[test]
    fn test_initialize_failure_keeps_adapter_unready() {
        let mut adapter = DetectionAdapter::new();
        let result = adapter.initialize(&StubLoader {
            fail: true,
            seen: Arc::default(),
        });
        assert_eq!(result, Err(ModelLoadError::Resolve("offline".to_string())));
        assert!(!adapter.is_ready());
    }

    #[test]
    fn test_detect_passes_through_detections() {
        let (mut adapter, _) = ready_adapter();
        let dets = adapter.detect(&frame(), 10).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bounding_box, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_non_increasing_timestamps_are_bumped() {
        let (mut adapter, seen) = ready_adapter();
        for ts in [100, 100, 50, 200] {
            adapter.detect(&frame(), ts).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![100, 101, 102, 200]);
    }

    #[test]
    fn test_empty_frame_rejected_without_calling_detector() {
        let (mut adapter, seen) = ready_adapter();
        let empty = Frame::new(Vec::new(), 0, 0, 3, 0);
        assert_eq!(adapter.detect(&empty, 1), Err(DetectionError::EmptyFrame));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inference_error_is_wrapped() {
        let mut adapter = DetectionAdapter::new();
        adapter
            .install(Ok(Box::new(RecordingDetector {
                seen: Arc::default(),
                detections: Vec::new(),
                fail: true,
            })))
            .unwrap();
        assert_eq!(
            adapter.detect(&frame(), 1),
            Err(DetectionError::Inference("session crashed".to_string()))
        );
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut adapter, _) = ready_adapter();
        adapter.dispose();
        adapter.dispose();
        assert!(!adapter.is_ready());
        assert_eq!(adapter.detect(&frame(), 1), Err(DetectionError::NotInitialized));
    }

    #[test]
    fn test_load_in_background_delivers_result() {
        let rx = load_in_background(Arc::new(StubLoader {
            fail: false,
            seen: Arc::default(),
        }));
        let result = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        let mut adapter = DetectionAdapter::new();
        adapter.install(result).unwrap();
        assert!(adapter.is_ready());
    }
}
