//! sorterd - waste sorting daemon
//!
//! This daemon:
//! 1. Opens the camera and keeps the newest frame in a shared buffer
//! 2. Loads the detector model
//! 3. Opens the serial link to the chute controller board (reconnects if it is absent)
//! 4. Answers every trigger byte with one verdict code until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use waste_sorter::{
    load_backend, open_source, CaptureLoop, Controller, FrameBuffer, SerialLink, ShutdownToken,
    SnapshotAnnotator, SorterConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify waste on trigger and report to the chute controller")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "SORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Camera device, still image, or stub:// scene.
    #[arg(long)]
    camera: Option<String>,

    /// Serial port of the chute controller board.
    #[arg(long)]
    serial_port: Option<String>,

    /// ONNX model path.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Detector backend: tract (needs a build with the backend-tract feature) or stub.
    #[arg(long)]
    backend: Option<String>,

    /// Write the last classified frame, annotated, to this JPEG.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SorterConfig::load_from(args.config.as_deref())?;
    apply_overrides(&mut config, args);
    config.validate()?;

    log::info!(
        "sorterd {} starting: camera={}, serial={}@{}, detector={} ({})",
        env!("CARGO_PKG_VERSION"),
        config.camera.device,
        config.serial.port,
        config.serial.baud_rate,
        config.detector.backend,
        config.detector.model_path.display()
    );

    // Without a camera or a model there is nothing to classify: both are fatal.
    let source = open_source(&config.camera)?;
    let detector = load_backend(&config.detector)?;
    let link = SerialLink::open(config.serial.clone());

    let shutdown = ShutdownToken::new();
    let buffer = Arc::new(FrameBuffer::new());
    let capture = CaptureLoop::new(
        source,
        buffer.clone(),
        shutdown.clone(),
        config.camera.read_retry,
    )
    .spawn()?;

    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        signal.trigger();
    })
    .context("set Ctrl-C handler")?;

    let mut controller = Controller::new(
        config.controller.clone(),
        buffer,
        detector,
        Box::new(link),
        shutdown.clone(),
    );
    if let Some(path) = &config.snapshot_path {
        log::info!("annotated snapshots written to {}", path.display());
        controller = controller.with_annotator(Box::new(SnapshotAnnotator::new(path)));
    }

    let stats = controller.run();

    shutdown.trigger();
    let capture_stats = capture.join()?;
    log::info!(
        "sorterd stopped: cycles={} failures={} retries={} write_errors={} dropped_triggers={} frames={}",
        stats.cycles,
        stats.failures,
        stats.retries,
        stats.write_errors,
        stats.dropped_triggers,
        capture_stats.frames
    );
    Ok(())
}

fn apply_overrides(config: &mut SorterConfig, args: Args) {
    if let Some(camera) = args.camera {
        config.camera.device = camera;
    }
    if let Some(port) = args.serial_port {
        config.serial.port = port;
    }
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    if let Some(backend) = args.backend {
        config.detector.backend = backend;
    }
    if let Some(snapshot) = args.snapshot {
        config.snapshot_path = Some(snapshot);
    }
}
