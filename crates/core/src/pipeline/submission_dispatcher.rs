use crossbeam_channel::Sender;

use crate::capture::domain::capture_state_machine::SubmissionTicket;
use crate::submission::domain::attendance_service::SubmissionError;
use crate::submission::domain::receipts::SubmissionReceipt;

/// A finished submission, tagged with the generation it was started in.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub generation: u64,
    pub result: Result<SubmissionReceipt, SubmissionError>,
}

/// Runs submissions off the event loop.
///
/// This is a port; infrastructure decides where the request executes. The
/// result is sent on `results` exactly once. A dropped receiver means the
/// session is gone, and the result is discarded.
pub trait SubmissionDispatcher: Send {
    fn dispatch(&self, ticket: SubmissionTicket, results: Sender<SubmissionResult>);
}
