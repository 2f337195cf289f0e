use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{
    CROP_JPEG_QUALITY, DEFAULT_CONFIDENCE, DEFAULT_CROP_MARGIN_PX, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SAMPLE_INTERVAL_MS, DEFAULT_SERVICE_URL,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Client settings shared by every capture flow.
///
/// Missing keys in the JSON file fall back to their defaults, so a config
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub service_url: String,
    pub sample_interval_ms: u64,
    pub crop_margin_px: u32,
    pub crop_jpeg_quality: u8,
    pub confidence: f64,
    pub request_timeout_secs: u64,
    /// Where to download the detector model from when it is not cached.
    pub model_url: Option<String>,
    /// Directory holding a pre-packaged copy of the model.
    pub model_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            crop_margin_px: DEFAULT_CROP_MARGIN_PX,
            crop_jpeg_quality: CROP_JPEG_QUALITY,
            confidence: DEFAULT_CONFIDENCE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            model_url: None,
            model_dir: None,
        }
    }
}

impl ClientConfig {
    /// `<config_dir>/FaceAttend/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceAttend").join("config.json"))
    }

    /// Loads the config at `path`, or the default location when `None`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;
        let config: Self =
            serde_json::from_str(&json).map_err(|e| ConfigError::Parse { path, source: e })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.service_url.starts_with("http://") || self.service_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "Service URL must start with http:// or https://, got '{}'",
                self.service_url
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Sample interval must be at least 1 ms".to_string(),
            ));
        }
        if !(1..=100).contains(&self.crop_jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.crop_jpeg_quality
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::Invalid(format!(
                "Confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
