use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("could not open video source {source_name}: {reason}")]
    Open { source_name: String, reason: String },
    #[error("video source failed: {0}")]
    Stream(String),
    #[error("video source ended")]
    Ended,
}

/// A live video feed the sampler can pull the current frame from.
///
/// Sources decode at their own pace; `current_frame` returns whatever frame
/// is newest at call time, not a queue of every decoded frame.
pub trait VideoSource: Send {
    /// Whether at least one decodable frame is available.
    fn poll_ready(&mut self) -> Result<bool, SourceError>;

    /// The newest decoded frame, or `None` if nothing has been decoded yet.
    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Releases device handles and background decoders. Idempotent.
    fn close(&mut self);
}
