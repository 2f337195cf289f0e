use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Sender;

use faceattend_core::capture::domain::capture_error::CaptureError;
use faceattend_core::capture::domain::capture_state_machine::Phase;
use faceattend_core::capture::domain::face_crop::FaceCrop;
use faceattend_core::detection::infrastructure::blazeface_loader::BlazefaceLoader;
use faceattend_core::encoding::domain::image_encoder::ImageEncoder;
use faceattend_core::encoding::infrastructure::jpeg_image_encoder::JpegImageEncoder;
use faceattend_core::pipeline::capture_flow::{CaptureFlow, FlowCommand, FlowParts, FlowSettings};
use faceattend_core::pipeline::capture_observer::{CaptureObserver, LogCaptureObserver};
use faceattend_core::pipeline::infrastructure::threaded_submission_dispatcher::ThreadedSubmissionDispatcher;
use faceattend_core::sampling::domain::frame_sampler::FrameSampler;
use faceattend_core::sampling::domain::video_source::VideoSource;
use faceattend_core::sampling::infrastructure::ffmpeg_video_source::FfmpegVideoSource;
use faceattend_core::sampling::infrastructure::still_image_source::StillImageSource;
use faceattend_core::shared::config::ClientConfig;
use faceattend_core::shared::constants::{FRAME_JPEG_QUALITY, IMAGE_EXTENSIONS};
use faceattend_core::submission::domain::attendance_service::{
    AttendanceService, EndpointKind, EnrollFields,
};
use faceattend_core::submission::domain::receipts::SubmissionReceipt;
use faceattend_core::submission::infrastructure::http_attendance_client::HttpAttendanceClient;

/// How long `snapshot` waits for the camera to deliver a frame.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Face enrollment and attendance verification from a camera feed.
#[derive(Parser)]
#[command(name = "faceattend")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new person: capture their face and send it with name and age.
    Enroll {
        #[command(flatten)]
        source: SourceArgs,

        /// Full name to register.
        #[arg(long)]
        name: String,

        /// Age in years.
        #[arg(long)]
        age: String,
    },
    /// Check a face against registered people and record attendance.
    Verify {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// List recorded attendance.
    Attendance,
    /// Save one full camera frame as JPEG.
    Snapshot {
        #[command(flatten)]
        source: SourceArgs,

        /// Output JPEG path.
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Camera device, video file or still image.
    #[arg(long)]
    source: String,

    /// ffmpeg input device format for cameras (e.g. v4l2, avfoundation, dshow).
    #[arg(long)]
    input_format: Option<String>,
}

/// Command-line values that take precedence over the config file.
#[derive(Args)]
struct Overrides {
    /// Config file (default: <config dir>/FaceAttend/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Attendance service base URL.
    #[arg(long, global = true)]
    service_url: Option<String>,

    /// Milliseconds between sampled frames.
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, global = true)]
    confidence: Option<f64>,

    /// Download URL for the face detection model.
    #[arg(long, global = true)]
    model_url: Option<String>,

    /// Directory holding a pre-packaged face detection model.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.overrides)?;

    match cli.command {
        Command::Enroll { source, name, age } => {
            let fields = EnrollFields::new(name, age);
            fields.validate()?;
            run_capture(EndpointKind::Enroll, &source, Some(fields), &config)
        }
        Command::Verify { source } => run_capture(EndpointKind::Verify, &source, None, &config),
        Command::Attendance => run_attendance(&config),
        Command::Snapshot { source, output } => run_snapshot(&source, &output),
    }
}

fn load_config(overrides: &Overrides) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = ClientConfig::load(overrides.config.as_deref())?;
    if let Some(url) = &overrides.service_url {
        config.service_url = url.clone();
    }
    if let Some(ms) = overrides.interval_ms {
        config.sample_interval_ms = ms;
    }
    if let Some(confidence) = overrides.confidence {
        config.confidence = confidence;
    }
    if let Some(url) = &overrides.model_url {
        config.model_url = Some(url.clone());
    }
    if let Some(dir) = &overrides.model_dir {
        config.model_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run_capture(
    kind: EndpointKind,
    source_args: &SourceArgs,
    fields: Option<EnrollFields>,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = open_source(source_args)?;
    let service: Arc<dyn AttendanceService> = Arc::new(HttpAttendanceClient::from_config(config)?);

    let mut flow = CaptureFlow::new(
        kind,
        FlowSettings::from_config(config),
        FlowParts {
            source,
            loader: Arc::new(BlazefaceLoader::from_config(config)),
            encoder: Arc::new(JpegImageEncoder::new()),
            dispatcher: Box::new(ThreadedSubmissionDispatcher::new(service)),
            observer: Box::new(ConsolePresenter::new()),
        },
    );

    let (tx, rx) = crossbeam_channel::unbounded();
    if let Some(fields) = &fields {
        let _ = tx.send(FlowCommand::SetFields(fields.clone()));
    }
    eprintln!("Keys: Enter = submit, r = reset, q = quit");
    spawn_stdin_reader(tx, fields);

    let phase = flow.run(&rx)?;
    log::debug!("Capture ended in {phase:?}");
    Ok(())
}

/// Turns stdin lines into flow commands. Closing stdin stops the flow.
fn spawn_stdin_reader(tx: Sender<FlowCommand>, fields: Option<EnrollFields>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let commands = match line.trim() {
                "" => vec![FlowCommand::Submit],
                "r" => {
                    // Reset clears the session's form fields.
                    let mut cmds = vec![FlowCommand::Reset];
                    cmds.extend(fields.clone().map(FlowCommand::SetFields));
                    cmds
                }
                "q" => vec![FlowCommand::Stop],
                other => {
                    eprintln!("Unknown key '{other}' (Enter = submit, r = reset, q = quit)");
                    continue;
                }
            };
            for cmd in commands {
                if tx.send(cmd).is_err() {
                    return;
                }
            }
        }
    });
}

fn run_attendance(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = HttpAttendanceClient::from_config(config)?;
    let records = client.fetch_attendance()?;
    if records.is_empty() {
        println!("No attendance recorded.");
        return Ok(());
    }

    println!("{:<24} {:>4}  {}", "Name", "Age", "Time (UTC)");
    for record in &records {
        println!(
            "{:<24} {:>4}  {}",
            record.name,
            record.age,
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn run_snapshot(source_args: &SourceArgs, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut sampler = FrameSampler::new(open_source(source_args)?);
    sampler.start(Duration::from_millis(50))?;

    let deadline = Instant::now() + SNAPSHOT_TIMEOUT;
    let frame = loop {
        if let Some(frame) = sampler.tick()? {
            break frame;
        }
        if Instant::now() >= deadline {
            sampler.shutdown();
            return Err("Camera produced no frame in time".into());
        }
        if let Some(ticker) = sampler.ticker() {
            let _ = ticker.recv_timeout(SNAPSHOT_TIMEOUT);
        }
    };
    sampler.shutdown();

    let bytes = JpegImageEncoder::new().encode(&frame, FRAME_JPEG_QUALITY)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, bytes)?;
    log::info!(
        "Saved {}x{} frame to {}",
        frame.width(),
        frame.height(),
        output.display()
    );
    Ok(())
}

fn open_source(args: &SourceArgs) -> Result<Box<dyn VideoSource>, Box<dyn std::error::Error>> {
    if args.input_format.is_none() && !Path::new(&args.source).exists() {
        return Err(format!("Source not found: {}", args.source).into());
    }
    if args.input_format.is_none() && is_image(Path::new(&args.source)) {
        return Ok(Box::new(StillImageSource::open(Path::new(&args.source))?));
    }
    Ok(Box::new(FfmpegVideoSource::open(
        &args.source,
        args.input_format.as_deref(),
    )?))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Prints what the user needs to see; everything else goes to the log.
struct ConsolePresenter {
    log: LogCaptureObserver,
}

impl ConsolePresenter {
    fn new() -> Self {
        Self {
            log: LogCaptureObserver::new(),
        }
    }
}

impl CaptureObserver for ConsolePresenter {
    fn phase_changed(&mut self, from: Phase, to: Phase) {
        self.log.phase_changed(from, to);
        match to {
            Phase::ModelLoading => println!("Loading face detector..."),
            Phase::Scanning if from != Phase::Locked => println!("Looking for a face..."),
            Phase::Scanning => println!("Face lost, looking again..."),
            Phase::Locked => println!("Face detected. Press Enter to submit."),
            Phase::Submitting => println!("Submitting..."),
            Phase::Complete => println!("Done. Press r to capture again or q to quit."),
            Phase::Failed | Phase::Idle => {}
        }
    }

    fn face_locked(&mut self, crop: &FaceCrop) {
        self.log.face_locked(crop);
    }

    fn error(&mut self, error: &CaptureError) {
        self.log.error(error);
        println!("{error}");
        if error.is_fatal() {
            if matches!(error, CaptureError::ModelLoad(_)) {
                println!("Press r to retry loading the detector, or q to quit.");
            }
        } else if !matches!(error, CaptureError::Validation(_) | CaptureError::Detection(_)) {
            println!("Show your face to try again, or press r to reset.");
        }
    }

    fn submission_succeeded(&mut self, receipt: &SubmissionReceipt) {
        self.log.submission_succeeded(receipt);
        if let Some(reg) = receipt.registration() {
            println!(
                "{} Registered {} (age {}) as user {}.",
                reg.message, reg.name, reg.age, reg.user_id
            );
        } else if let Some(ver) = receipt.verification() {
            if !ver.is_match() {
                println!("{}", ver.message);
            } else {
                let name = ver.name.as_deref().unwrap_or("unknown");
                match ver.confidence_percent() {
                    Some(pct) => println!("{} Welcome, {name} ({pct:.1}% match).", ver.message),
                    None => println!("{} Welcome, {name}.", ver.message),
                }
            }
        } else {
            println!("Service replied: {}", receipt.body);
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.log.timing(stage, duration_ms);
    }

    fn summary(&self) {
        self.log.summary();
    }
}
