use thiserror::Error;

use crate::detection::domain::detection_adapter::{DetectionError, ModelLoadError};
use crate::encoding::domain::image_encoder::EncodeError;
use crate::sampling::domain::video_source::SourceError;
use crate::submission::domain::attendance_service::SubmissionError;

/// Why a submission was refused before it started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no face is locked")]
    NoFace,
    #[error("enrollment requires name and age")]
    MissingFields,
    #[error("name is required")]
    MissingName,
    #[error("age is required")]
    MissingAge,
    #[error("age must be a whole number, got '{0}'")]
    InvalidAge(String),
}

/// Everything that can go wrong in a capture session, as shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    SourceUnavailable(SourceError),
    #[error("face detector failed to load: {0}")]
    ModelLoad(ModelLoadError),
    #[error("{0}")]
    Detection(DetectionError),
    #[error("{0}")]
    Validation(ValidationError),
    #[error("could not encode face image: {0}")]
    Encoding(String),
    #[error("could not reach the attendance service: {0}")]
    Network(String),
    #[error("attendance service returned {status}: {body}")]
    Server { status: u16, body: String },
}

impl CaptureError {
    /// Fatal errors end the flow; the user has to restart it (or, for a
    /// model load failure, retry the load).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::ModelLoad(_))
    }
}

impl From<SourceError> for CaptureError {
    fn from(e: SourceError) -> Self {
        Self::SourceUnavailable(e)
    }
}

impl From<ModelLoadError> for CaptureError {
    fn from(e: ModelLoadError) -> Self {
        Self::ModelLoad(e)
    }
}

impl From<DetectionError> for CaptureError {
    fn from(e: DetectionError) -> Self {
        Self::Detection(e)
    }
}

impl From<ValidationError> for CaptureError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<EncodeError> for CaptureError {
    fn from(e: EncodeError) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl From<SubmissionError> for CaptureError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::Invalid(v) => Self::Validation(v),
            SubmissionError::Encoding(msg) => Self::Encoding(msg),
            SubmissionError::Network(msg) => Self::Network(msg),
            SubmissionError::Server { status, body } => Self::Server { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CaptureError::SourceUnavailable(SourceError::Ended), true)]
    #[case(CaptureError::ModelLoad(ModelLoadError::Runtime("x".into())), true)]
    #[case(CaptureError::Detection(DetectionError::Inference("oom".into())), false)]
    #[case(CaptureError::Validation(ValidationError::MissingName), false)]
    #[case(CaptureError::Encoding("empty".into()), false)]
    #[case(CaptureError::Network("refused".into()), false)]
    #[case(CaptureError::Server { status: 500, body: "db error".into() }, false)]
    fn test_fatality(#[case] err: CaptureError, #[case] fatal: bool) {
        assert_eq!(err.is_fatal(), fatal);
    }

    #[test]
    fn test_refused_submission_is_a_validation_error() {
        let err: CaptureError = SubmissionError::Invalid(ValidationError::MissingFields).into();
        assert_eq!(err, CaptureError::Validation(ValidationError::MissingFields));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_server_error_keeps_status_and_body() {
        let err: CaptureError = SubmissionError::Server {
            status: 500,
            body: "db error".to_string(),
        }
        .into();
        assert_eq!(
            err,
            CaptureError::Server {
                status: 500,
                body: "db error".to_string()
            }
        );
        assert_eq!(err.to_string(), "attendance service returned 500: db error");
    }
}
