use std::path::PathBuf;

use super::model_resolver::{self, ProgressFn};
use super::onnx_blazeface_detector::OnnxBlazefaceDetector;
use crate::detection::domain::detection_adapter::{DetectorLoader, LoadResult, ModelLoadError};
use crate::shared::config::ClientConfig;
use crate::shared::constants::BLAZEFACE_MODEL_NAME;

/// Resolves the BlazeFace model file and starts an ONNX session on it.
pub struct BlazefaceLoader {
    model_url: Option<String>,
    model_dir: Option<PathBuf>,
    confidence: f64,
}

impl BlazefaceLoader {
    pub fn new(model_url: Option<String>, model_dir: Option<PathBuf>, confidence: f64) -> Self {
        Self {
            model_url,
            model_dir,
            confidence,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.model_url.clone(),
            config.model_dir.clone(),
            config.confidence,
        )
    }
}

impl DetectorLoader for BlazefaceLoader {
    fn load(&self) -> LoadResult {
        let path = model_resolver::resolve(
            BLAZEFACE_MODEL_NAME,
            self.model_url.as_deref(),
            self.model_dir.as_deref(),
            Some(download_progress()),
        )
        .map_err(|e| ModelLoadError::Resolve(e.to_string()))?;

        let detector = OnnxBlazefaceDetector::new(&path, self.confidence)
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;
        log::info!("Loaded {}", path.display());
        Ok(Box::new(detector))
    }
}

/// Logs download progress in 10% steps.
fn download_progress() -> ProgressFn {
    let last_decile = std::sync::atomic::AtomicU64::new(u64::MAX);
    Box::new(move |downloaded, total| {
        if total == 0 {
            return;
        }
        let decile = downloaded * 10 / total;
        if last_decile.swap(decile, std::sync::atomic::Ordering::Relaxed) != decile {
            log::info!("Model download {}%", decile * 10);
        }
    })
}
