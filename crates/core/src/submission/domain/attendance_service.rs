use thiserror::Error;

use super::receipts::{AttendanceRecord, SubmissionReceipt};
use crate::capture::domain::capture_error::ValidationError;
use crate::capture::domain::face_crop::FaceCrop;
use crate::shared::constants::{REGISTER_FACE_PATH, VERIFY_FACE_PATH};

/// Which service operation a capture flow submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Register a new person: name, age and face image.
    Enroll,
    /// Match a face against registered people and record attendance.
    Verify,
}

impl EndpointKind {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Enroll => REGISTER_FACE_PATH,
            Self::Verify => VERIFY_FACE_PATH,
        }
    }

    pub fn requires_fields(&self) -> bool {
        matches!(self, Self::Enroll)
    }
}

/// Form fields sent alongside an enrollment image.
///
/// Kept as entered; [`validate`](Self::validate) decides whether they can be
/// submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollFields {
    pub name: String,
    pub age: String,
}

impl EnrollFields {
    pub fn new(name: impl Into<String>, age: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: age.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        let age = self.age.trim();
        if age.is_empty() {
            return Err(ValidationError::MissingAge);
        }
        if age.parse::<u32>().is_err() {
            return Err(ValidationError::InvalidAge(age.to_string()));
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The request was refused before anything was sent.
    #[error("{0}")]
    Invalid(ValidationError),
    #[error("face image could not be serialized: {0}")]
    Encoding(String),
    #[error("service unreachable: {0}")]
    Network(String),
    #[error("service returned {status}: {body}")]
    Server { status: u16, body: String },
}

/// The remote attendance service.
///
/// Implementations perform exactly one request per call; retry policy
/// belongs to the caller.
pub trait AttendanceService: Send + Sync {
    /// Posts `crop` to the endpoint for `kind`. `fields` is sent only for
    /// [`EndpointKind::Enroll`].
    fn submit(
        &self,
        kind: EndpointKind,
        crop: &FaceCrop,
        fields: Option<&EnrollFields>,
    ) -> Result<SubmissionReceipt, SubmissionError>;

    fn fetch_attendance(&self) -> Result<Vec<AttendanceRecord>, SubmissionError>;
}
