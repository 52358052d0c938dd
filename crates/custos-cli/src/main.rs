use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use custos_core::{
    CaptureSession, IdentityResolver, IdentityStore, LbphClassifier, NewIdentity, Pipeline, QualityGate,
    RecognitionCache, Recognizer, Region, ScrfdDetector,
};
use custos_hw::Camera;
use custos_store::{SampleDir, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod engine;
mod evaluate;
mod notify;
mod report;

use config::Config;
use notify::{LogNotifier, Notice};

#[derive(Parser)]
#[command(name = "custos", about = "Face enrollment and recognition terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from the camera
    Enroll {
        #[arg(short, long)]
        name: String,
        /// National identity number; must be unique
        #[arg(long)]
        national_id: String,
        #[arg(short, long)]
        email: String,
    },
    /// Watch the camera until an enrolled person is recognized
    Monitor,
    /// Rebuild the recognition model from enrolled samples
    Train,
    /// Write a recognition report for an inclusive range of days
    Report {
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
    },
    /// Measure recognition accuracy on labelled face crops
    /// (<dir>/<scenario>/<national_id>/<image>)
    Evaluate {
        #[arg(long)]
        dir: PathBuf,
        /// Results CSV; defaults to reports/evaluation_<time>.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Run camera diagnostics
    Test,
}

/// Install stderr logging (filtered by `RUST_LOG`) plus a per-run log file
/// that records at least `info`. The guard must outlive every log call.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    let logs_dir = config.logs_dir();
    let file_name = format!("custos_{}.log", Local::now().format("%Y%m%d_%H%M%S"));

    match std::fs::create_dir_all(&logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(&logs_dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::registry()
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer).with_filter(file_filter))
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry().with(stderr).init();
            tracing::warn!(dir = %logs_dir.display(), error = %e, "file logging disabled");
            None
        }
    }
}

/// Flag raised by Ctrl-C and polled by the frame loops.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            raised.store(true, Ordering::Relaxed);
        }
    });
    flag
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let _log_guard = init_tracing(&config);

    tracing::info!(data_dir = %config.data_dir.display(), "custos starting");

    match cli.command {
        Commands::Enroll {
            name,
            national_id,
            email,
        } => {
            let cancel = cancel_on_ctrl_c();
            let request = NewIdentity {
                name,
                national_id,
                email,
                sample_paths: Vec::new(),
            };
            tokio::task::spawn_blocking(move || enroll(&config, request, &cancel)).await??;
        }
        Commands::Monitor => {
            let cancel = cancel_on_ctrl_c();
            tokio::task::spawn_blocking(move || monitor(&config, &cancel)).await??;
        }
        Commands::Train => {
            let store = SqliteStore::open(&config.db_path())?;
            let samples = train(&config, &store)?;
            println!("Model trained on {samples} sample(s).");
        }
        Commands::Report { from, to } => report(&config, from, to)?,
        Commands::Evaluate { dir, output } => evaluate(&config, &dir, output)?,
        Commands::List => list(&config)?,
        Commands::Test => diagnostics(&config)?,
    }

    Ok(())
}

fn open_camera(config: &Config) -> Result<Camera> {
    Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("opening camera {}", config.camera_device))
}

fn build_pipeline(config: &Config, classifier: LbphClassifier) -> Result<Pipeline<ScrfdDetector, LbphClassifier>> {
    let detector = ScrfdDetector::load(&config.detector_model_path())?;
    Ok(Pipeline::new(
        detector,
        Recognizer::new(classifier, RecognitionCache::with_capacity(config.recognition.cache_capacity)),
        QualityGate::new(config.quality.clone()),
        IdentityResolver::new(config.recognition.threshold),
    ))
}

fn enroll(config: &Config, mut request: NewIdentity, cancel: &AtomicBool) -> Result<()> {
    let mut store = SqliteStore::open(&config.db_path())?;
    engine::precheck_enrollment(&store, &request.national_id)?;

    let camera = open_camera(config)?;
    let guide = Region::centered(camera.width(), camera.height(), config.capture.guide_size)?;
    let mut pipeline = build_pipeline(config, LbphClassifier::default())?;
    let mut session = CaptureSession::new(guide, config.capture.dwell());

    println!("Position your face inside the guide area. Press Ctrl-C to cancel.");
    let sample = {
        let mut stream = camera.stream()?;
        engine::run_capture(&mut stream, &mut pipeline, &mut session, cancel, |prompt| {
            println!("  {prompt}");
        })?
    };
    let Some(sample) = sample else {
        println!("Enrollment cancelled.");
        return Ok(());
    };

    let samples = SampleDir::new(&config.data_dir);
    let path = samples.save_enrollment(&request.national_id, &sample)?;
    request.sample_paths.push(path.clone());
    let identity = match store.enroll(request) {
        Ok(identity) => identity,
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path, error = %rm, "could not remove orphaned sample");
            }
            return Err(e.into());
        }
    };

    let set = SampleDir::training_set(&store.identities()?);
    pipeline.train(&set.samples, &set.labels)?;
    pipeline
        .recognizer()
        .classifier()
        .save(&config.classifier_model_path())?;

    notify::send(&LogNotifier, &Notice::enrolled(&identity));
    println!("Enrolled {} (id {}).", identity.name, identity.id);
    Ok(())
}

fn monitor(config: &Config, cancel: &AtomicBool) -> Result<()> {
    let mut store = SqliteStore::open(&config.db_path())?;
    if store.identities()?.is_empty() {
        bail!("no identities enrolled; run `custos enroll` first");
    }
    let classifier = LbphClassifier::load(&config.classifier_model_path())?;

    let camera = open_camera(config)?;
    let mut pipeline = build_pipeline(config, classifier)?;
    let mut archive = SampleDir::new(&config.data_dir);

    println!("Monitoring. Press Ctrl-C to stop.");
    let mut stream = camera.stream()?;
    match engine::run_monitor(&mut stream, &mut pipeline, &mut store, &mut archive, &LogNotifier, cancel)? {
        Some(resolution) => println!(
            "Recognized {} ({}) with {:.2}% confidence.",
            resolution.identity.name, resolution.identity.national_id, resolution.event.confidence
        ),
        None => println!("Monitoring stopped."),
    }
    Ok(())
}

/// Retrain from every enrolled sample and save the model. Returns the sample count.
fn train(config: &Config, store: &SqliteStore) -> Result<usize> {
    let set = SampleDir::training_set(&store.identities()?);
    if set.skipped > 0 {
        println!("Warning: {} enrollment sample(s) could not be read.", set.skipped);
    }
    let mut recognizer = Recognizer::new(LbphClassifier::default(), RecognitionCache::default());
    recognizer.train(&set.samples, &set.labels)?;
    recognizer.classifier().save(&config.classifier_model_path())?;
    Ok(set.samples.len())
}

fn report(config: &Config, from: NaiveDate, to: NaiveDate) -> Result<()> {
    let range = report::ReportRange::new(from, to)?;
    let (start, end) = range.utc_bounds(&Local)?;
    let store = SqliteStore::open(&config.db_path())?;
    let events = store.recognitions_in_range(start, end)?;

    let body = report::render(&range, &events, Local::now());
    let path = report::write(&config.reports_dir(), &range, &body)?;
    println!("{body}");
    println!("Report saved to {}", path.display());
    Ok(())
}

fn evaluate(config: &Config, dir: &Path, output: Option<PathBuf>) -> Result<()> {
    let store = SqliteStore::open(&config.db_path())?;
    let identities = store.identities()?;
    let classifier = LbphClassifier::load(&config.classifier_model_path())?;
    let mut recognizer = Recognizer::new(classifier, RecognitionCache::with_capacity(config.recognition.cache_capacity));
    let resolver = IdentityResolver::new(config.recognition.threshold);

    let scenarios = custos_store::load_scenarios(dir)?;
    if scenarios.is_empty() {
        bail!("no scenario directories under {}", dir.display());
    }
    let results = evaluate::run(&mut recognizer, &resolver, &scenarios, &identities);

    let now = Local::now();
    let path = output.unwrap_or_else(|| evaluate::results_path(&config.reports_dir(), now));
    evaluate::write_results(&path, &results)?;
    if let Err(e) = evaluate::append_metrics_log(&config.metrics_log_path(), now, &results) {
        tracing::warn!(error = %e, "could not append to metrics log");
    }

    println!(
        "{:<24} {:>7} {:>9} {:>9} {:>9} {:>9}",
        "SCENARIO", "SAMPLES", "ACCURACY", "PRECISION", "RECALL", "F1"
    );
    for m in &results {
        println!(
            "{:<24} {:>7} {:>9.3} {:>9.3} {:>9.3} {:>9.3}",
            m.scenario, m.samples, m.accuracy, m.precision, m.recall, m.f1
        );
    }
    println!("Results saved to {}", path.display());
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db_path())?;
    let identities = store.identities()?;
    if identities.is_empty() {
        println!("No identities enrolled.");
        return Ok(());
    }
    println!("{:<5} {:<30} {:<16} {:<30} ENROLLED", "ID", "NAME", "NATIONAL ID", "EMAIL");
    for identity in identities {
        println!(
            "{:<5} {:<30} {:<16} {:<30} {}",
            identity.id,
            identity.name,
            identity.national_id,
            identity.email,
            identity.enrolled_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn diagnostics(config: &Config) -> Result<()> {
    println!("Video capture devices:");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for device in &devices {
        println!("  {} — {} [{}] {}", device.path, device.name, device.driver, device.bus);
    }

    let camera = open_camera(config)?;
    println!(
        "\nOpened {} at {}x{} ({:?})",
        camera.device_path(),
        camera.width(),
        camera.height(),
        camera.pixel_format()
    );
    for frame in camera.capture_frames(3)? {
        let brightness = frame.avg_brightness();
        let note = if frame.is_dark {
            "  <- dark frame; check lighting"
        } else if brightness > config.quality.max_brightness {
            "  <- overexposed"
        } else {
            ""
        };
        println!("  frame {:>4}: brightness {brightness:6.1}{note}", frame.sequence);
    }

    let model = config.detector_model_path();
    println!(
        "\nDetector model {}: {}",
        model.display(),
        if model.exists() { "present" } else { "MISSING" }
    );
    Ok(())
}
