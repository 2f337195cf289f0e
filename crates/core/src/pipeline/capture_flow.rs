use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{never, select, Receiver, Sender};

use super::capture_observer::CaptureObserver;
use super::submission_dispatcher::{SubmissionDispatcher, SubmissionResult};
use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::capture_state_machine::{
    CaptureStateMachine, CropSettings, ObserveOutcome, Phase, SubmitOutcome,
};
use crate::detection::domain::detection_adapter::{
    load_in_background, DetectionAdapter, DetectorLoader, LoadResult, ModelLoadError,
};
use crate::encoding::domain::image_encoder::ImageEncoder;
use crate::sampling::domain::frame_sampler::FrameSampler;
use crate::sampling::domain::video_source::VideoSource;
use crate::shared::config::ClientConfig;
use crate::submission::domain::attendance_service::{EndpointKind, EnrollFields};

/// User input delivered to a running flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowCommand {
    Submit,
    SetFields(EnrollFields),
    /// Start over after `Complete` or `Failed`; retries a failed model load.
    Reset,
    RetryModel,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSettings {
    pub sample_interval: Duration,
    pub crop: CropSettings,
}

impl FlowSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            crop: CropSettings {
                margin_px: config.crop_margin_px,
                jpeg_quality: config.crop_jpeg_quality,
            },
        }
    }
}

/// The collaborators a flow drives.
pub struct FlowParts {
    pub source: Box<dyn VideoSource>,
    pub loader: Arc<dyn DetectorLoader>,
    pub encoder: Arc<dyn ImageEncoder>,
    pub dispatcher: Box<dyn SubmissionDispatcher>,
    pub observer: Box<dyn CaptureObserver>,
}

/// One capture flow: sampler, detector, session and submissions, driven by
/// a single-threaded event loop.
///
/// Everything that mutates the session runs on the thread calling
/// [`run`](Self::run), one event at a time; model loading and submissions
/// run elsewhere and report back over channels.
pub struct CaptureFlow {
    machine: CaptureStateMachine,
    sampler: FrameSampler,
    adapter: DetectionAdapter,
    loader: Arc<dyn DetectorLoader>,
    dispatcher: Box<dyn SubmissionDispatcher>,
    observer: Box<dyn CaptureObserver>,
    interval: Duration,
    model_rx: Option<Receiver<LoadResult>>,
    results_tx: Sender<SubmissionResult>,
    results_rx: Receiver<SubmissionResult>,
}

impl CaptureFlow {
    pub fn new(kind: EndpointKind, settings: FlowSettings, parts: FlowParts) -> Self {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        Self {
            machine: CaptureStateMachine::new(kind, settings.crop, parts.encoder),
            sampler: FrameSampler::new(parts.source),
            adapter: DetectionAdapter::new(),
            loader: parts.loader,
            dispatcher: parts.dispatcher,
            observer: parts.observer,
            interval: settings.sample_interval,
            model_rx: None,
            results_tx,
            results_rx,
        }
    }

    pub fn machine(&self) -> &CaptureStateMachine {
        &self.machine
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Mounts the session and runs until `Stop`, the command channel
    /// closes, or the camera is lost.
    ///
    /// Returns the final phase, or the fatal source error. The session is
    /// unmounted either way.
    pub fn run(&mut self, commands: &Receiver<FlowCommand>) -> Result<Phase, CaptureError> {
        self.mount();
        let outcome = self.event_loop(commands);
        let last = self.phase();
        self.unmount();
        outcome.map(|()| last)
    }

    fn event_loop(&mut self, commands: &Receiver<FlowCommand>) -> Result<(), CaptureError> {
        loop {
            let ticker = self.sampler.ticker().cloned().unwrap_or_else(never);
            let model_rx = self.model_rx.clone().unwrap_or_else(never);
            let results_rx = self.results_rx.clone();

            select! {
                recv(commands) -> msg => match msg {
                    Ok(FlowCommand::Stop) | Err(_) => return Ok(()),
                    Ok(cmd) => self.handle_command(cmd),
                },
                recv(model_rx) -> msg => {
                    self.model_rx = None;
                    let result = msg.unwrap_or_else(|_| {
                        Err(ModelLoadError::Runtime("loader thread exited".to_string()))
                    });
                    self.handle_model_result(result);
                },
                recv(results_rx) -> msg => {
                    if let Ok(done) = msg {
                        self.handle_submission_result(done);
                    }
                },
                recv(ticker) -> _ => self.handle_tick(),
            }

            if let Some(err @ CaptureError::SourceUnavailable(_)) = self.machine.last_error() {
                if self.phase() == Phase::Failed {
                    return Err(err.clone());
                }
            }
        }
    }

    /// `Idle → ModelLoading` and starts the detector load.
    pub fn mount(&mut self) {
        self.transition(|m| {
            m.mount();
        });
        if self.phase() == Phase::ModelLoading {
            self.begin_model_load();
        }
    }

    /// Ends the session: stops sampling, releases the camera and detector,
    /// and drops the results channel so late submissions go nowhere.
    pub fn unmount(&mut self) {
        self.sampler.shutdown();
        self.adapter.dispose();
        self.model_rx = None;
        let (tx, rx) = crossbeam_channel::unbounded();
        self.results_tx = tx;
        self.results_rx = rx;
        self.transition(CaptureStateMachine::unmount);
        self.observer.summary();
    }

    pub fn handle_command(&mut self, cmd: FlowCommand) {
        match cmd {
            FlowCommand::Submit => self.submit(),
            FlowCommand::SetFields(fields) => self.machine.set_fields(fields),
            FlowCommand::Reset => {
                let before = self.phase();
                match self.machine.reset() {
                    // A reset during an ongoing load leaves it running.
                    Ok(Phase::ModelLoading) if before == Phase::Failed => self.begin_model_load(),
                    Ok(_) => {}
                    Err(e) => self.observer.error(&e),
                }
                self.notify_phase(before);
            }
            FlowCommand::RetryModel => {
                let before = self.phase();
                if self.machine.retry_model_load() {
                    self.begin_model_load();
                }
                self.notify_phase(before);
            }
            FlowCommand::Stop => {}
        }
    }

    pub fn handle_model_result(&mut self, result: LoadResult) {
        let outcome = self.adapter.install(result);
        self.transition(|m| {
            m.model_loaded(outcome);
        });
        match self.phase() {
            Phase::Scanning => {
                if let Err(e) = self.sampler.start(self.interval) {
                    self.transition(|m| m.source_failed(e));
                }
            }
            Phase::Failed => {
                if let Some(err) = self.machine.last_error().cloned() {
                    self.observer.error(&err);
                }
            }
            _ => {}
        }
    }

    pub fn handle_submission_result(&mut self, done: SubmissionResult) {
        let before = self.phase();
        if !self.machine.submission_finished(done.generation, done.result) {
            return;
        }
        match self.phase() {
            Phase::Complete => {
                if let Some(receipt) = self.machine.receipt().cloned() {
                    self.observer.submission_succeeded(&receipt);
                }
            }
            _ => {
                if let Some(err) = self.machine.last_error().cloned() {
                    self.observer.error(&err);
                }
            }
        }
        self.notify_phase(before);
    }

    /// One sampling cycle: pull a frame, detect, update the lock.
    pub fn handle_tick(&mut self) {
        let frame = match self.sampler.tick() {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                self.transition(|m| m.source_failed(e));
                if let Some(err) = self.machine.last_error().cloned() {
                    self.observer.error(&err);
                }
                return;
            }
        };
        if !self.machine.accepts_detections() {
            return;
        }

        let started = Instant::now();
        let detections = match self.adapter.detect(&frame, frame.timestamp_ms()) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Skipping frame {}: {e}", frame.timestamp_ms());
                let err = self.machine.detection_failed(e);
                self.observer.error(&err);
                return;
            }
        };
        self.observer
            .timing("detect", started.elapsed().as_secs_f64() * 1000.0);

        let started = Instant::now();
        let before = self.phase();
        match self.machine.observe(&frame, &detections) {
            ObserveOutcome::Locked(crop) => {
                self.observer
                    .timing("crop", started.elapsed().as_secs_f64() * 1000.0);
                self.observer.face_locked(&crop);
            }
            ObserveOutcome::Rejected(err) => self.observer.error(&err),
            ObserveOutcome::Cleared | ObserveOutcome::Ignored => {}
        }
        self.notify_phase(before);
    }

    fn submit(&mut self) {
        let before = self.phase();
        match self.machine.request_submit() {
            Ok(SubmitOutcome::Started(ticket)) => {
                log::info!(
                    "Submitting {}x{} face (generation {})",
                    ticket.crop.width(),
                    ticket.crop.height(),
                    ticket.generation
                );
                self.dispatcher.dispatch(ticket, self.results_tx.clone());
            }
            Ok(SubmitOutcome::InFlight) => log::debug!("Submission already in flight"),
            Ok(SubmitOutcome::Ignored(phase)) => log::debug!("Submit ignored in {phase:?}"),
            Err(e) => self.observer.error(&e),
        }
        self.notify_phase(before);
    }

    fn begin_model_load(&mut self) {
        log::info!("Loading face detector");
        self.model_rx = Some(load_in_background(self.loader.clone()));
    }

    /// Applies `f` to the session and reports any phase change.
    fn transition<F>(&mut self, f: F)
    where
        F: FnOnce(&mut CaptureStateMachine),
    {
        let before = self.phase();
        f(&mut self.machine);
        self.notify_phase(before);
    }

    fn notify_phase(&mut self, before: Phase) {
        let after = self.phase();
        if before != after {
            self.observer.phase_changed(before, after);
        }
    }
}
