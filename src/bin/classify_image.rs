//! classify_image - run the detector and the vote on one still image.
//!
//! Prints every detection, the verdict, and the code the daemon would send for it.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use waste_sorter::annotate::draw_detections;
use waste_sorter::ingest::{FrameSource, StillImageSource};
use waste_sorter::{
    load_backend, vote, ControllerSettings, DetectionSet, DetectorSettings, Verdict, WireCode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify a single image of waste")]
struct Args {
    /// Image to classify (.jpg, .jpeg, .png).
    image: PathBuf,

    /// ONNX model path.
    #[arg(long, env = "SORTER_MODEL_PATH", default_value = "best.onnx")]
    model: PathBuf,

    /// Detector backend: tract (needs a build with the backend-tract feature) or stub.
    #[arg(long, default_value = "tract")]
    backend: String,

    /// Square model input side in pixels.
    #[arg(long, default_value_t = 320)]
    input_size: u32,

    /// Minimum detection confidence.
    #[arg(long, default_value_t = 0.25)]
    confidence: f32,

    /// Skip the blank-surface check and always run the detector.
    #[arg(long)]
    no_blank_check: bool,

    /// Write the image with detection boxes to this path.
    #[arg(long)]
    annotated_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut source = StillImageSource::new(&args.image);
    source.connect()?;
    let frame = source.next_frame()?;
    source.close();

    let blank_check = if args.no_blank_check {
        None
    } else {
        ControllerSettings::default().blank_check
    };
    let (verdict, detections) = match blank_check {
        Some(check) if check.is_blank(&frame) => {
            println!("blank surface: no object present");
            (Verdict::Mixed, DetectionSet::empty())
        }
        _ => {
            let settings = DetectorSettings {
                backend: args.backend.trim().to_lowercase(),
                model_path: args.model.clone(),
                input_size: args.input_size,
                confidence: args.confidence,
                ..DetectorSettings::default()
            };
            let mut detector = load_backend(&settings)?;
            let detections = detector.detect(&frame)?;
            for detection in &detections {
                let bbox = detection.bbox;
                println!(
                    "{}: {:.2} [{:.0}, {:.0}, {:.0}, {:.0}]",
                    detection.class, detection.score, bbox.x1, bbox.y1, bbox.x2, bbox.y2
                );
            }
            (vote(&detections), detections)
        }
    };

    let code = WireCode::for_verdict(verdict);
    println!(
        "verdict: {} (code {})",
        verdict,
        String::from_utf8_lossy(code.as_bytes())
    );

    if let Some(path) = &args.annotated_out {
        draw_detections(&frame, &detections)?.save(path)?;
        log::info!("annotated image written to {}", path.display());
    }
    Ok(())
}
