use std::sync::Arc;

use super::capture_error::{CaptureError, ValidationError};
use super::face_crop::FaceCrop;
use crate::detection::domain::detection_adapter::{DetectionError, ModelLoadError};
use crate::detection::domain::face_detector::Detection;
use crate::encoding::domain::image_encoder::ImageEncoder;
use crate::sampling::domain::video_source::SourceError;
use crate::shared::frame::Frame;
use crate::submission::domain::attendance_service::{EndpointKind, EnrollFields, SubmissionError};
use crate::submission::domain::receipts::SubmissionReceipt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ModelLoading,
    Scanning,
    Locked,
    Submitting,
    Complete,
    Failed,
}

/// Crop geometry and encoding settings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropSettings {
    pub margin_px: u32,
    pub jpeg_quality: u8,
}

/// What a detection cycle did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserveOutcome {
    /// The first detection was cropped and is now the lock.
    Locked(FaceCrop),
    /// No face in the frame; any previous lock was dropped.
    Cleared,
    /// The crop could not be produced; the lock was dropped.
    Rejected(CaptureError),
    /// The current phase does not consume detections.
    Ignored,
}

/// Everything a dispatcher needs to run one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTicket {
    pub generation: u64,
    pub kind: EndpointKind,
    pub crop: FaceCrop,
    pub fields: Option<EnrollFields>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// `Locked → Submitting`; the caller must dispatch the ticket.
    Started(SubmissionTicket),
    /// A submission is already outstanding; nothing happened.
    InFlight,
    /// The trigger has no meaning in this phase.
    Ignored(Phase),
}

/// The capture session: one per mounted capture flow.
///
/// Detections, user triggers and submission results all arrive as method
/// calls on the event loop thread, so phase changes are plain assignments.
/// Each started submission bumps a generation counter; results carrying an
/// older generation (a reset, an unmount or a source failure happened in
/// between) are dropped.
pub struct CaptureStateMachine {
    kind: EndpointKind,
    settings: CropSettings,
    encoder: Arc<dyn ImageEncoder>,
    phase: Phase,
    locked_face: Option<FaceCrop>,
    pending_fields: EnrollFields,
    last_error: Option<CaptureError>,
    /// Cause of the current `Failed` phase.
    failure: Option<CaptureError>,
    receipt: Option<SubmissionReceipt>,
    generation: u64,
}

impl CaptureStateMachine {
    pub fn new(kind: EndpointKind, settings: CropSettings, encoder: Arc<dyn ImageEncoder>) -> Self {
        Self {
            kind,
            settings,
            encoder,
            phase: Phase::Idle,
            locked_face: None,
            pending_fields: EnrollFields::default(),
            last_error: None,
            failure: None,
            receipt: None,
            generation: 0,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn locked_face(&self) -> Option<&FaceCrop> {
        self.locked_face.as_ref()
    }

    pub fn pending_fields(&self) -> &EnrollFields {
        &self.pending_fields
    }

    pub fn last_error(&self) -> Option<&CaptureError> {
        self.last_error.as_ref()
    }

    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        self.receipt.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while detection cycles can change the lock.
    pub fn accepts_detections(&self) -> bool {
        match self.phase {
            Phase::Scanning | Phase::Locked => true,
            Phase::Failed => !self.is_fatally_failed(),
            _ => false,
        }
    }

    /// `Idle → ModelLoading`. Returns false if already mounted.
    pub fn mount(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::ModelLoading;
        true
    }

    /// Applies the outcome of a detector load started by `mount` or
    /// `retry_model_load`.
    pub fn model_loaded(&mut self, result: Result<(), ModelLoadError>) -> Phase {
        if self.phase != Phase::ModelLoading {
            log::debug!("Ignoring model load result in {:?}", self.phase);
            return self.phase;
        }
        match result {
            Ok(()) => self.phase = Phase::Scanning,
            Err(e) => self.fail(e.into()),
        }
        self.phase
    }

    /// `Failed(ModelLoad) → ModelLoading`: the manual retry.
    pub fn retry_model_load(&mut self) -> bool {
        if !matches!(self.failure, Some(CaptureError::ModelLoad(_))) {
            return false;
        }
        self.failure = None;
        self.last_error = None;
        self.phase = Phase::ModelLoading;
        true
    }

    /// The camera is gone. Fatal from any mounted phase; an outstanding
    /// submission's result will be ignored.
    pub fn source_failed(&mut self, err: SourceError) {
        if self.phase == Phase::Idle {
            return;
        }
        self.generation += 1;
        self.locked_face = None;
        self.fail(err.into());
    }

    /// A detection cycle failed. Recorded for presentation; the phase and
    /// any lock are left alone so the next cycle can try again.
    pub fn detection_failed(&mut self, err: DetectionError) -> CaptureError {
        let err = CaptureError::from(err);
        self.last_error = Some(err.clone());
        err
    }

    /// Consumes one detection cycle. Only the first detection is used.
    pub fn observe(&mut self, frame: &Frame, detections: &[Detection]) -> ObserveOutcome {
        if !self.accepts_detections() {
            return ObserveOutcome::Ignored;
        }

        let Some(first) = detections.first() else {
            self.locked_face = None;
            if self.phase == Phase::Locked {
                self.phase = Phase::Scanning;
            }
            return ObserveOutcome::Cleared;
        };

        match FaceCrop::extract(
            frame,
            first,
            self.settings.margin_px,
            self.encoder.as_ref(),
            self.settings.jpeg_quality,
        ) {
            Ok(crop) => {
                self.locked_face = Some(crop.clone());
                self.phase = Phase::Locked;
                ObserveOutcome::Locked(crop)
            }
            Err(e) => {
                let err = CaptureError::from(e);
                self.locked_face = None;
                if self.phase == Phase::Locked {
                    self.phase = Phase::Scanning;
                }
                self.last_error = Some(err.clone());
                ObserveOutcome::Rejected(err)
            }
        }
    }

    /// Replaces the enrollment fields as typed so far.
    pub fn set_fields(&mut self, fields: EnrollFields) {
        self.pending_fields = fields;
    }

    /// The user's submit trigger.
    ///
    /// Starts a submission from `Locked` when the crop and (for enrollment)
    /// the fields are valid. A validation failure leaves the session where
    /// it was.
    pub fn request_submit(&mut self) -> Result<SubmitOutcome, CaptureError> {
        match self.phase {
            Phase::Submitting => return Ok(SubmitOutcome::InFlight),
            Phase::Locked => {}
            Phase::Scanning => return Err(self.reject(ValidationError::NoFace)),
            Phase::Failed if !self.is_fatally_failed() => {
                return Err(self.reject(ValidationError::NoFace))
            }
            other => return Ok(SubmitOutcome::Ignored(other)),
        }

        let Some(crop) = self.locked_face.clone().filter(|c| !c.is_empty()) else {
            return Err(self.reject(ValidationError::NoFace));
        };
        let fields = if self.kind.requires_fields() {
            if let Err(e) = self.pending_fields.validate() {
                return Err(self.reject(e));
            }
            Some(self.pending_fields.clone())
        } else {
            None
        };

        self.generation += 1;
        self.last_error = None;
        self.failure = None;
        self.phase = Phase::Submitting;
        Ok(SubmitOutcome::Started(SubmissionTicket {
            generation: self.generation,
            kind: self.kind,
            crop,
            fields,
        }))
    }

    /// Applies a submission result. Returns false if the result was stale
    /// and ignored.
    pub fn submission_finished(
        &mut self,
        generation: u64,
        result: Result<SubmissionReceipt, SubmissionError>,
    ) -> bool {
        if self.phase != Phase::Submitting || generation != self.generation {
            log::debug!(
                "Dropping stale submission result (generation {generation}, current {})",
                self.generation
            );
            return false;
        }

        self.locked_face = None;
        match result {
            Ok(receipt) => {
                self.receipt = Some(receipt);
                self.phase = Phase::Complete;
            }
            Err(e) => self.fail(e.into()),
        }
        true
    }

    /// Starts over from `Complete` or `Failed`, keeping the loaded detector.
    ///
    /// Returns the phase entered: `Scanning`, or `ModelLoading` when the
    /// detector never loaded. A lost camera cannot be reset; the flow must
    /// be restarted.
    pub fn reset(&mut self) -> Result<Phase, CaptureError> {
        match self.phase {
            Phase::Complete | Phase::Failed => {}
            other => return Ok(other),
        }
        if let Some(err @ CaptureError::SourceUnavailable(_)) = &self.failure {
            return Err(err.clone());
        }

        let next = match self.failure {
            Some(CaptureError::ModelLoad(_)) => Phase::ModelLoading,
            _ => Phase::Scanning,
        };
        self.clear_session();
        self.phase = next;
        Ok(next)
    }

    /// Ends the session. Any outstanding result will be ignored.
    pub fn unmount(&mut self) {
        self.generation += 1;
        self.clear_session();
        self.phase = Phase::Idle;
    }

    fn is_fatally_failed(&self) -> bool {
        self.phase == Phase::Failed && self.failure.as_ref().is_some_and(CaptureError::is_fatal)
    }

    fn fail(&mut self, err: CaptureError) {
        log::warn!("Capture failed: {err}");
        self.failure = Some(err.clone());
        self.last_error = Some(err);
        self.phase = Phase::Failed;
    }

    fn reject(&mut self, err: ValidationError) -> CaptureError {
        let err = CaptureError::Validation(err);
        self.last_error = Some(err.clone());
        err
    }

    fn clear_session(&mut self) {
        self.locked_face = None;
        self.pending_fields = EnrollFields::default();
        self.last_error = None;
        self.failure = None;
        self.receipt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_detector::BoundingBox;
    use crate::encoding::domain::image_encoder::EncodeError;
    use crate::shared::region::Region;
    use serde_json::json;

    /// Emits the raw pixels so tests can check what was cropped.
    struct RawEncoder;

    impl ImageEncoder for RawEncoder {
        fn encode(&self, frame: &Frame, _quality: u8) -> Result<Vec<u8>, EncodeError> {
            Ok(frame.data().to_vec())
        }

        fn mime_type(&self) -> &'static str {
            "application/octet-stream"
        }
    }

    const SETTINGS: CropSettings = CropSettings {
        margin_px: 7,
        jpeg_quality: 95,
    };

    fn machine(kind: EndpointKind) -> CaptureStateMachine {
        CaptureStateMachine::new(kind, SETTINGS, Arc::new(RawEncoder))
    }

    fn scanning(kind: EndpointKind) -> CaptureStateMachine {
        let mut m = machine(kind);
        assert!(m.mount());
        assert_eq!(m.model_loaded(Ok(())), Phase::Scanning);
        m
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 640 * 480 * 3], 640, 480, 3, 0)
    }

    fn det(x: f64, y: f64, w: f64, h: f64, confidence: f64) -> Detection {
        Detection {
            bounding_box: BoundingBox::new(x, y, w, h),
            confidence,
        }
    }

    fn face() -> Detection {
        det(100.0, 50.0, 200.0, 200.0, 0.9)
    }

    fn locked(kind: EndpointKind) -> CaptureStateMachine {
        let mut m = scanning(kind);
        assert!(matches!(m.observe(&frame(), &[face()]), ObserveOutcome::Locked(_)));
        m
    }

    fn started(m: &mut CaptureStateMachine) -> SubmissionTicket {
        match m.request_submit() {
            Ok(SubmitOutcome::Started(ticket)) => ticket,
            other => panic!("expected a started submission, got {other:?}"),
        }
    }

    fn server_error() -> SubmissionError {
        SubmissionError::Server {
            status: 500,
            body: "db error".to_string(),
        }
    }

    #[test]
    fn test_detection_failure_is_recorded_without_changing_phase() {
        let mut m = locked(EndpointKind::Verify);
        let err = m.detection_failed(DetectionError::Inference("inference crashed".into()));

        assert_eq!(m.phase(), Phase::Locked);
        assert!(m.locked_face().is_some());
        assert_eq!(m.last_error(), Some(&err));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_mount_and_load_reach_scanning() {
        let mut m = machine(EndpointKind::Verify);
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.mount());
        assert_eq!(m.phase(), Phase::ModelLoading);
        assert!(!m.mount());
        assert_eq!(m.model_loaded(Ok(())), Phase::Scanning);
    }

    #[test]
    fn test_detections_ignored_until_model_loads() {
        let mut m = machine(EndpointKind::Verify);
        assert_eq!(m.observe(&frame(), &[face()]), ObserveOutcome::Ignored);
        m.mount();
        assert_eq!(m.observe(&frame(), &[face()]), ObserveOutcome::Ignored);
        assert!(m.locked_face().is_none());
    }

    #[test]
    fn test_model_load_failure_is_fatal_until_retry() {
        let mut m = machine(EndpointKind::Verify);
        m.mount();
        let err = ModelLoadError::Resolve("offline".to_string());
        assert_eq!(m.model_loaded(Err(err.clone())), Phase::Failed);
        assert_eq!(m.last_error(), Some(&CaptureError::ModelLoad(err)));

        assert_eq!(m.observe(&frame(), &[face()]), ObserveOutcome::Ignored);
        assert_eq!(m.request_submit(), Ok(SubmitOutcome::Ignored(Phase::Failed)));

        assert!(m.retry_model_load());
        assert_eq!(m.phase(), Phase::ModelLoading);
        assert!(m.last_error().is_none());
        assert_eq!(m.model_loaded(Ok(())), Phase::Scanning);
    }

    #[test]
    fn test_reset_after_model_failure_reloads() {
        let mut m = machine(EndpointKind::Verify);
        m.mount();
        m.model_loaded(Err(ModelLoadError::Runtime("bad model".to_string())));
        assert_eq!(m.reset(), Ok(Phase::ModelLoading));
    }

    #[test]
    fn test_retry_only_applies_to_model_failure() {
        let mut m = scanning(EndpointKind::Verify);
        assert!(!m.retry_model_load());
        assert_eq!(m.phase(), Phase::Scanning);
    }

    #[test]
    fn test_empty_detections_clear_lock_and_keep_scanning() {
        let mut m = locked(EndpointKind::Verify);
        assert_eq!(m.observe(&frame(), &[]), ObserveOutcome::Cleared);
        assert_eq!(m.phase(), Phase::Scanning);
        assert!(m.locked_face().is_none());

        assert_eq!(m.observe(&frame(), &[]), ObserveOutcome::Cleared);
        assert_eq!(m.phase(), Phase::Scanning);
    }

    #[test]
    fn test_only_first_detection_is_cropped() {
        let mut m = scanning(EndpointKind::Verify);
        let detections = [
            det(100.0, 50.0, 200.0, 200.0, 0.55),
            det(400.0, 200.0, 100.0, 100.0, 0.99),
        ];
        match m.observe(&frame(), &detections) {
            ObserveOutcome::Locked(crop) => {
                assert_eq!(crop.region(), Region::new(93, 43, 214, 214));
                assert_eq!(crop.confidence(), 0.55);
            }
            other => panic!("expected lock, got {other:?}"),
        }
        assert_eq!(m.phase(), Phase::Locked);
    }

    #[test]
    fn test_new_detection_replaces_unsubmitted_lock() {
        let mut m = locked(EndpointKind::Verify);
        m.observe(&frame(), &[det(0.0, 0.0, 50.0, 50.0, 0.8)]);
        assert_eq!(m.locked_face().unwrap().region(), Region::new(0, 0, 57, 57));
    }

    #[test]
    fn test_out_of_frame_box_is_rejected_and_unlocks() {
        let mut m = locked(EndpointKind::Verify);
        let outcome = m.observe(&frame(), &[det(900.0, 900.0, 20.0, 20.0, 0.9)]);
        assert!(matches!(outcome, ObserveOutcome::Rejected(CaptureError::Encoding(_))));
        assert_eq!(m.phase(), Phase::Scanning);
        assert!(m.locked_face().is_none());
        assert!(matches!(m.last_error(), Some(CaptureError::Encoding(_))));
    }

    #[test]
    fn test_submit_without_face_is_validation_error() {
        let mut m = scanning(EndpointKind::Verify);
        assert_eq!(
            m.request_submit(),
            Err(CaptureError::Validation(ValidationError::NoFace))
        );
        assert_eq!(m.phase(), Phase::Scanning);
    }

    #[test]
    fn test_enroll_with_empty_name_stays_locked() {
        let mut m = locked(EndpointKind::Enroll);
        m.set_fields(EnrollFields::new("", "30"));
        assert_eq!(
            m.request_submit(),
            Err(CaptureError::Validation(ValidationError::MissingName))
        );
        assert_eq!(m.phase(), Phase::Locked);
        assert!(m.locked_face().is_some());
        assert_eq!(
            m.last_error(),
            Some(&CaptureError::Validation(ValidationError::MissingName))
        );
    }

    #[test]
    fn test_enroll_ticket_carries_fields_and_verify_does_not() {
        let mut enroll = locked(EndpointKind::Enroll);
        enroll.set_fields(EnrollFields::new("Ada", "36"));
        let ticket = started(&mut enroll);
        assert_eq!(ticket.kind, EndpointKind::Enroll);
        assert_eq!(ticket.fields, Some(EnrollFields::new("Ada", "36")));

        let mut verify = locked(EndpointKind::Verify);
        verify.set_fields(EnrollFields::new("ignored", "1"));
        assert_eq!(started(&mut verify).fields, None);
    }

    #[test]
    fn test_second_trigger_while_submitting_is_noop() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);
        assert_eq!(m.phase(), Phase::Submitting);

        assert_eq!(m.request_submit(), Ok(SubmitOutcome::InFlight));
        assert_eq!(m.request_submit(), Ok(SubmitOutcome::InFlight));
        assert_eq!(m.generation(), ticket.generation);
    }

    #[test]
    fn test_detections_do_not_touch_crop_in_flight() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);

        assert_eq!(m.observe(&frame(), &[]), ObserveOutcome::Ignored);
        assert_eq!(
            m.observe(&frame(), &[det(0.0, 0.0, 10.0, 10.0, 0.9)]),
            ObserveOutcome::Ignored
        );
        assert_eq!(m.locked_face(), Some(&ticket.crop));
        assert_eq!(m.phase(), Phase::Submitting);
    }

    #[test]
    fn test_success_completes_with_receipt() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);
        let receipt = SubmissionReceipt::new(200, json!({"message": "Face verified successfully."}));

        assert!(m.submission_finished(ticket.generation, Ok(receipt.clone())));
        assert_eq!(m.phase(), Phase::Complete);
        assert_eq!(m.receipt(), Some(&receipt));
        assert!(m.locked_face().is_none());
        assert_eq!(m.observe(&frame(), &[face()]), ObserveOutcome::Ignored);
    }

    #[test]
    fn test_server_error_then_reset_returns_to_scanning() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);

        assert!(m.submission_finished(ticket.generation, Err(server_error())));
        assert_eq!(m.phase(), Phase::Failed);
        assert_eq!(
            m.last_error(),
            Some(&CaptureError::Server {
                status: 500,
                body: "db error".to_string()
            })
        );
        assert!(m.locked_face().is_none());

        assert_eq!(m.reset(), Ok(Phase::Scanning));
        assert!(m.last_error().is_none());
        assert!(matches!(m.observe(&frame(), &[face()]), ObserveOutcome::Locked(_)));
    }

    #[test]
    fn test_recoverable_failure_relocks_without_reset() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);
        m.submission_finished(ticket.generation, Err(SubmissionError::Network("refused".into())));

        assert_eq!(m.observe(&frame(), &[]), ObserveOutcome::Cleared);
        assert_eq!(m.phase(), Phase::Failed);
        assert!(matches!(m.observe(&frame(), &[face()]), ObserveOutcome::Locked(_)));
        assert_eq!(m.phase(), Phase::Locked);

        let retry = started(&mut m);
        assert!(retry.generation > ticket.generation);
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_stale_result_after_reset_is_ignored() {
        let mut m = locked(EndpointKind::Verify);
        let first = started(&mut m);
        m.submission_finished(first.generation, Err(server_error()));
        m.reset().unwrap();
        m.observe(&frame(), &[face()]);
        let second = started(&mut m);

        assert!(!m.submission_finished(first.generation, Ok(SubmissionReceipt::new(200, json!({})))));
        assert_eq!(m.phase(), Phase::Submitting);
        assert!(m.submission_finished(second.generation, Ok(SubmissionReceipt::new(200, json!({})))));
    }

    #[test]
    fn test_result_after_unmount_is_ignored() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);
        m.unmount();

        assert!(!m.submission_finished(ticket.generation, Ok(SubmissionReceipt::new(200, json!({})))));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.receipt().is_none());
    }

    #[test]
    fn test_source_failure_is_fatal() {
        let mut m = locked(EndpointKind::Verify);
        let ticket = started(&mut m);
        m.source_failed(SourceError::Ended);

        assert_eq!(m.phase(), Phase::Failed);
        assert!(!m.submission_finished(ticket.generation, Err(server_error())));
        assert_eq!(m.observe(&frame(), &[face()]), ObserveOutcome::Ignored);
        assert_eq!(
            m.reset(),
            Err(CaptureError::SourceUnavailable(SourceError::Ended))
        );
        assert_eq!(m.phase(), Phase::Failed);
    }

    #[test]
    fn test_reset_clears_fields_and_is_noop_elsewhere() {
        let mut m = locked(EndpointKind::Enroll);
        m.set_fields(EnrollFields::new("Ada", "36"));
        assert_eq!(m.reset(), Ok(Phase::Locked));
        assert_eq!(m.pending_fields(), &EnrollFields::new("Ada", "36"));

        let ticket = started(&mut m);
        m.submission_finished(ticket.generation, Ok(SubmissionReceipt::new(200, json!({}))));
        assert_eq!(m.reset(), Ok(Phase::Scanning));
        assert_eq!(m.pending_fields(), &EnrollFields::default());
        assert!(m.receipt().is_none());
    }
}
