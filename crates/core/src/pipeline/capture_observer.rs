use std::collections::HashMap;
use std::time::Instant;

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::capture_state_machine::Phase;
use crate::capture::domain::face_crop::FaceCrop;
use crate::submission::domain::receipts::SubmissionReceipt;

/// Cross-cutting sink for capture flow events.
///
/// Keeps the flow independent of how it is presented: a terminal UI, the
/// log, or nothing at all in tests.
pub trait CaptureObserver: Send {
    fn phase_changed(&mut self, from: Phase, to: Phase);

    /// A new face crop became the lock.
    fn face_locked(&mut self, crop: &FaceCrop);

    /// Any failure, fatal or not, including validation rejections.
    fn error(&mut self, error: &CaptureError);

    fn submission_succeeded(&mut self, receipt: &SubmissionReceipt);

    /// How long a named stage took for one cycle.
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}

    /// End-of-session report. Default: no-op.
    fn summary(&self) {}
}

/// Discards all events.
pub struct NullCaptureObserver;

impl CaptureObserver for NullCaptureObserver {
    fn phase_changed(&mut self, _from: Phase, _to: Phase) {}
    fn face_locked(&mut self, _crop: &FaceCrop) {}
    fn error(&mut self, _error: &CaptureError) {}
    fn submission_succeeded(&mut self, _receipt: &SubmissionReceipt) {}
}

/// Reports events through the `log` facade and keeps per-stage timings
/// for a session summary.
pub struct LogCaptureObserver {
    timings: HashMap<String, Vec<f64>>,
    locks: usize,
    errors: usize,
    submissions: usize,
    start_time: Instant,
}

impl LogCaptureObserver {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            locks: 0,
            errors: 0,
            submissions: 0,
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was timed.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Capture summary ({:.1}s, {} locks, {} submissions, {} errors):",
            elapsed_s, self.locks, self.submissions, self.errors
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = total_ms / durations.len().max(1) as f64;
            lines.push(format!(
                "  {stage:10}: avg {avg_ms:6.1}ms  over {} cycles",
                durations.len()
            ));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }
}

impl Default for LogCaptureObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureObserver for LogCaptureObserver {
    fn phase_changed(&mut self, from: Phase, to: Phase) {
        log::info!("{from:?} -> {to:?}");
    }

    fn face_locked(&mut self, crop: &FaceCrop) {
        self.locks += 1;
        let r = crop.region();
        log::debug!(
            "Face locked at ({}, {}) {}x{}, confidence {:.2}",
            r.x,
            r.y,
            r.width,
            r.height,
            crop.confidence()
        );
    }

    fn error(&mut self, error: &CaptureError) {
        self.errors += 1;
        if error.is_fatal() {
            log::error!("{error}");
        } else {
            log::warn!("{error}");
        }
    }

    fn submission_succeeded(&mut self, receipt: &SubmissionReceipt) {
        self.submissions += 1;
        match receipt.message() {
            Some(message) => log::info!("{message}"),
            None => log::info!("Submission accepted ({})", receipt.status),
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
