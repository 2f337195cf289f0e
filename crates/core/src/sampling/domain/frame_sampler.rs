use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::video_source::{SourceError, VideoSource};
use crate::shared::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Stopped,
    /// Started, but the source has not produced a frame yet.
    AwaitingReadiness,
    Running,
    /// The source failed; the sampler will not touch it again.
    Halted,
}

/// Samples a [`VideoSource`] on a fixed cadence.
///
/// The cadence is a `crossbeam_channel::tick` receiver the owning event loop
/// selects on; dropping it in [`stop`](Self::stop) is the only cancellation
/// primitive. Each tick re-stamps the frame with a strictly increasing
/// millisecond timestamp measured from the first `start`.
pub struct FrameSampler {
    source: Box<dyn VideoSource>,
    state: SamplerState,
    ticker: Option<Receiver<Instant>>,
    origin: Option<Instant>,
    last_timestamp_ms: Option<u64>,
    failure: Option<SourceError>,
}

impl FrameSampler {
    pub fn new(source: Box<dyn VideoSource>) -> Self {
        Self {
            source,
            state: SamplerState::Stopped,
            ticker: None,
            origin: None,
            last_timestamp_ms: None,
            failure: None,
        }
    }

    /// Begins periodic sampling.
    ///
    /// If the source has no frame yet the sampler waits, checking readiness
    /// on each tick, and begins yielding frames from the first tick that
    /// finds it ready.
    pub fn start(&mut self, interval: Duration) -> Result<(), SourceError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if matches!(
            self.state,
            SamplerState::Running | SamplerState::AwaitingReadiness
        ) {
            return Ok(());
        }

        self.origin.get_or_insert_with(Instant::now);
        self.ticker = Some(crossbeam_channel::tick(interval));

        match self.source.poll_ready() {
            Ok(true) => self.state = SamplerState::Running,
            Ok(false) => {
                log::info!("Video source not ready, waiting for first frame");
                self.state = SamplerState::AwaitingReadiness;
            }
            Err(e) => return Err(self.halt(e)),
        }
        log::debug!("Sampling every {} ms", interval.as_millis());
        Ok(())
    }

    /// Yields the current frame, or `None` if the source is not ready or the
    /// sampler is stopped.
    pub fn tick(&mut self) -> Result<Option<Frame>, SourceError> {
        match self.state {
            SamplerState::Stopped => return Ok(None),
            SamplerState::Halted => {
                return Err(self
                    .failure
                    .clone()
                    .unwrap_or(SourceError::Stream("sampler halted".to_string())))
            }
            SamplerState::AwaitingReadiness => match self.source.poll_ready() {
                Ok(true) => {
                    log::info!("Video source ready, sampling started");
                    self.state = SamplerState::Running;
                }
                Ok(false) => return Ok(None),
                Err(e) => return Err(self.halt(e)),
            },
            SamplerState::Running => {}
        }

        match self.source.current_frame() {
            Ok(Some(frame)) => {
                let ts = self.next_timestamp();
                Ok(Some(frame.with_timestamp(ts)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.halt(e)),
        }
    }

    /// Cancels periodic sampling. Idempotent.
    pub fn stop(&mut self) {
        self.ticker = None;
        if self.state != SamplerState::Halted {
            self.state = SamplerState::Stopped;
        }
    }

    /// Stops sampling and releases the source.
    pub fn shutdown(&mut self) {
        self.stop();
        self.source.close();
    }

    /// Tick channel to select on while sampling is active.
    pub fn ticker(&self) -> Option<&Receiver<Instant>> {
        self.ticker.as_ref()
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    fn halt(&mut self, err: SourceError) -> SourceError {
        log::error!("Video source unavailable: {err}");
        self.state = SamplerState::Halted;
        self.ticker = None;
        self.failure = Some(err.clone());
        err
    }

    fn next_timestamp(&mut self) -> u64 {
        let elapsed = self
            .origin
            .map(|o| o.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let ts = match self.last_timestamp_ms {
            Some(last) if elapsed <= last => last + 1,
            _ => elapsed,
        };
        self.last_timestamp_ms = Some(ts);
        ts
    }
}
