//! detect_live - continuous detection on the camera, logging every detection.
//!
//! No serial link and no voting: this is for checking the camera and the model in place.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use waste_sorter::ingest::read_with_retry;
use waste_sorter::{
    load_backend, open_source, vote, Annotator, ShutdownToken, SnapshotAnnotator, SorterConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the waste detector on live camera frames")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "SORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Camera device, still image, or stub:// scene.
    #[arg(long)]
    camera: Option<String>,

    /// ONNX model path.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Keep the newest annotated frame in this JPEG.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Stop after this many frames (0 runs until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SorterConfig::load_from(args.config.as_deref())?;
    if let Some(camera) = args.camera {
        config.camera.device = camera;
    }
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    config.validate()?;

    let mut source = open_source(&config.camera)?;
    let mut detector = load_backend(&config.detector)?;
    let mut annotator = args.snapshot.map(SnapshotAnnotator::new);

    let shutdown = ShutdownToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.trigger()).context("set Ctrl-C handler")?;

    log::info!(
        "detect_live: reading {} with {} detector, Ctrl-C to stop",
        source.name(),
        detector.name()
    );

    let mut processed = 0u64;
    while !shutdown.is_triggered() && (args.frames == 0 || processed < args.frames) {
        let Some(frame) = read_with_retry(source.as_mut(), &shutdown, config.camera.read_retry)
        else {
            break;
        };
        processed += 1;

        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("detect_live: frame #{} detection failed: {:#}", frame.sequence, err);
                continue;
            }
        };
        for detection in &detections {
            log::info!(
                "frame #{}: {} {:.2}",
                frame.sequence,
                detection.class,
                detection.score
            );
        }

        if let Some(annotator) = annotator.as_mut() {
            if let Err(err) = annotator.render(&frame, &detections, vote(&detections)) {
                log::warn!("detect_live: snapshot failed: {:#}", err);
            }
        }
    }

    source.close();
    log::info!("detect_live: stopped after {} frames", processed);
    Ok(())
}
