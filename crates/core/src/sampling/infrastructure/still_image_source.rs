use std::path::Path;

use crate::sampling::domain::video_source::{SourceError, VideoSource};
use crate::shared::frame::Frame;

/// Presents a single photo as a camera that always shows the same picture.
///
/// Decoded once with the `image` crate at construction, so the source is
/// ready from the first poll.
pub struct StillImageSource {
    frame: Option<Frame>,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let img = image::open(path)
            .map_err(|e| SourceError::Open {
                source_name: path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Self::from_frame(Frame::new(img.into_raw(), width, height, 3, 0)))
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }
}

impl VideoSource for StillImageSource {
    fn poll_ready(&mut self) -> Result<bool, SourceError> {
        if self.frame.is_none() {
            return Err(SourceError::Ended);
        }
        Ok(true)
    }

    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        match &self.frame {
            Some(frame) => Ok(Some(frame.clone())),
            None => Err(SourceError::Ended),
        }
    }

    fn close(&mut self) {
        self.frame = None;
    }
}
