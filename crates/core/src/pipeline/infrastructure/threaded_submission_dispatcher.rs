use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use crate::capture::domain::capture_state_machine::SubmissionTicket;
use crate::pipeline::submission_dispatcher::{SubmissionDispatcher, SubmissionResult};
use crate::submission::domain::attendance_service::AttendanceService;

/// Runs each submission on its own short-lived thread.
///
/// The state machine admits one submission at a time, so at most one
/// thread is active per session.
pub struct ThreadedSubmissionDispatcher {
    service: Arc<dyn AttendanceService>,
}

impl ThreadedSubmissionDispatcher {
    pub fn new(service: Arc<dyn AttendanceService>) -> Self {
        Self { service }
    }
}

impl SubmissionDispatcher for ThreadedSubmissionDispatcher {
    fn dispatch(&self, ticket: SubmissionTicket, results: Sender<SubmissionResult>) {
        let service = self.service.clone();
        thread::spawn(move || {
            let result = service.submit(ticket.kind, &ticket.crop, ticket.fields.as_ref());
            if results
                .send(SubmissionResult {
                    generation: ticket.generation,
                    result,
                })
                .is_err()
            {
                log::debug!(
                    "Session ended before submission {} finished",
                    ticket.generation
                );
            }
        });
    }
}
