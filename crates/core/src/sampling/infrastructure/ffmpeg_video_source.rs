use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::sampling::domain::video_source::{SourceError, VideoSource};
use crate::shared::frame::Frame;

/// Live source backed by ffmpeg-next: a camera device or a video file.
///
/// A background thread owns the ffmpeg contexts, decodes to RGB24 and keeps
/// only the newest frame in a shared slot. Files are paced at their native
/// frame rate so they behave like a camera; devices are paced by the device.
/// End of stream or a decode failure is latched and reported on every later
/// call.
pub struct FfmpegVideoSource {
    slot: Arc<Mutex<Slot>>,
    stop: Arc<AtomicBool>,
    decoder: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Slot {
    latest: Option<Frame>,
    failure: Option<SourceError>,
}

/// Stream properties discovered while opening, reported back to the caller.
struct Opened {
    width: u32,
    height: u32,
}

impl FfmpegVideoSource {
    /// Opens `location` (file path or device node) and starts decoding.
    ///
    /// `format` names an ffmpeg input device format such as `v4l2`,
    /// `avfoundation` or `dshow`; `None` lets ffmpeg probe a file.
    pub fn open(location: &str, format: Option<&str>) -> Result<Self, SourceError> {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (opened_tx, opened_rx) = crossbeam_channel::bounded::<Result<Opened, SourceError>>(1);

        let location_owned = location.to_string();
        let format_owned = format.map(str::to_string);
        let slot_thread = slot.clone();
        let stop_thread = stop.clone();

        let handle = thread::spawn(move || {
            let result = run_decoder(
                &location_owned,
                format_owned.as_deref(),
                &opened_tx,
                &slot_thread,
                &stop_thread,
            );
            if let Err(err) = result {
                if !stop_thread.load(Ordering::Relaxed) {
                    log::warn!("Video source {location_owned}: {err}");
                }
                let mut guard = slot_thread.lock().unwrap_or_else(|p| p.into_inner());
                guard.failure = Some(err);
            }
        });

        let opened = opened_rx.recv().map_err(|_| SourceError::Open {
            source_name: location.to_string(),
            reason: "decoder thread exited before opening".to_string(),
        })?;

        match opened {
            Ok(info) => {
                log::info!(
                    "Opened video source {location} ({}x{})",
                    info.width,
                    info.height
                );
                Ok(Self {
                    slot,
                    stop,
                    decoder: Some(handle),
                })
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn with_slot<T>(&self, f: impl FnOnce(&mut Slot) -> T) -> T {
        let mut guard = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

impl VideoSource for FfmpegVideoSource {
    fn poll_ready(&mut self) -> Result<bool, SourceError> {
        self.with_slot(|slot| {
            if slot.latest.is_some() {
                return Ok(true);
            }
            match &slot.failure {
                Some(err) => Err(err.clone()),
                None => Ok(false),
            }
        })
    }

    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        self.with_slot(|slot| match &slot.failure {
            Some(err) => Err(err.clone()),
            None => Ok(slot.latest.clone()),
        })
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.decoder.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_error(location: &str, e: impl std::fmt::Display) -> SourceError {
    SourceError::Open {
        source_name: location.to_string(),
        reason: e.to_string(),
    }
}

fn open_input(
    location: &str,
    format: Option<&str>,
) -> Result<ffmpeg_next::format::context::Input, ffmpeg_next::Error> {
    let Some(name) = format else {
        return ffmpeg_next::format::input(&location);
    };
    ffmpeg_next::device::register_all();
    let input_format = ffmpeg_next::device::input::video()
        .find(|f| f.name().split(',').any(|n| n == name))
        .ok_or(ffmpeg_next::Error::DemuxerNotFound)?;
    ffmpeg_next::format::open_with(
        &location,
        &ffmpeg_next::Format::Input(input_format),
        ffmpeg_next::Dictionary::new(),
    )
    .map(|ctx| ctx.input())
}

/// Decoder state built on the background thread; ffmpeg contexts never leave it.
struct DecodeStream {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    pace: Option<Duration>,
}

fn open_stream(location: &str, format: Option<&str>) -> Result<DecodeStream, SourceError> {
    ffmpeg_next::init().map_err(|e| open_error(location, e))?;
    let ictx = open_input(location, format).map_err(|e| open_error(location, e))?;
    let stream = ictx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| open_error(location, "no video stream found"))?;
    let stream_index = stream.index();
    let rate = stream.rate();
    let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| open_error(location, e))?;
    let decoder = codec_ctx
        .decoder()
        .video()
        .map_err(|e| open_error(location, e))?;
    let (width, height) = (decoder.width(), decoder.height());
    let scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| open_error(location, e))?;

    // Devices deliver frames in real time; files need pacing.
    let pace = if format.is_none() && rate.numerator() > 0 && rate.denominator() > 0 {
        Some(Duration::from_secs_f64(
            rate.denominator() as f64 / rate.numerator() as f64,
        ))
    } else {
        None
    };

    Ok(DecodeStream {
        ictx,
        decoder,
        scaler,
        stream_index,
        width,
        height,
        pace,
    })
}

fn run_decoder(
    location: &str,
    format: Option<&str>,
    opened_tx: &crossbeam_channel::Sender<Result<Opened, SourceError>>,
    slot: &Mutex<Slot>,
    stop: &AtomicBool,
) -> Result<(), SourceError> {
    let DecodeStream {
        mut ictx,
        mut decoder,
        mut scaler,
        stream_index,
        width,
        height,
        pace,
    } = match open_stream(location, format) {
        Ok(stream) => {
            let _ = opened_tx.send(Ok(Opened {
                width: stream.width,
                height: stream.height,
            }));
            stream
        }
        Err(e) => {
            let _ = opened_tx.send(Err(e.clone()));
            return Err(e);
        }
    };

    let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
    for (stream, packet) in ictx.packets() {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        if stream.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
            scaler
                .run(&decoded, &mut rgb_frame)
                .map_err(|e| SourceError::Stream(e.to_string()))?;
            let pixels = extract_rgb_pixels(&rgb_frame, width, height);
            {
                let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
                guard.latest = Some(Frame::new(pixels, width, height, 3, 0));
            }
            if let Some(delay) = pace {
                thread::sleep(delay);
            }
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
        }
    }

    Err(SourceError::Ended)
}

/// Copies pixel data out of an ffmpeg frame, dropping per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}
