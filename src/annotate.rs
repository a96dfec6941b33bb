//! Human-facing annotation of classified frames.
//!
//! Rendering never influences the verdict; failures are reported to the caller to log.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::detect::{DetectionSet, WasteClass};
use crate::frame::Frame;
use crate::verdict::Verdict;

const BOX_THICKNESS: i32 = 2;
const SNAPSHOT_JPEG_QUALITY: u8 = 85;

pub trait Annotator: Send {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet, verdict: Verdict) -> Result<()>;
}

/// Writes the last classified frame, with detection boxes, to a JPEG file.
pub struct SnapshotAnnotator {
    path: PathBuf,
}

impl SnapshotAnnotator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Annotator for SnapshotAnnotator {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet, verdict: Verdict) -> Result<()> {
        let image = draw_detections(frame, detections)?;
        let file = File::create(&self.path)
            .with_context(|| format!("create snapshot {}", self.path.display()))?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), SNAPSHOT_JPEG_QUALITY);
        encoder
            .encode_image(&image)
            .with_context(|| format!("encode snapshot {}", self.path.display()))?;
        log::debug!(
            "snapshot: wrote {} ({} boxes, verdict {})",
            self.path.display(),
            detections.len(),
            verdict
        );
        Ok(())
    }
}

/// Copy the frame into an image and outline every detection in its class colour.
pub fn draw_detections(frame: &Frame, detections: &DetectionSet) -> Result<RgbImage> {
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;
    for detection in detections {
        let bbox = detection.bbox;
        for inset in 0..BOX_THICKNESS {
            draw_rectangle(
                &mut image,
                bbox.x1.round() as i32 + inset,
                bbox.y1.round() as i32 + inset,
                bbox.x2.round() as i32 - inset,
                bbox.y2.round() as i32 - inset,
                class_color(detection.class),
            );
        }
    }
    Ok(image)
}

fn class_color(class: WasteClass) -> Rgb<u8> {
    match class {
        WasteClass::Organic => Rgb([0, 200, 0]),
        WasteClass::NonOrganic => Rgb([0, 120, 255]),
        WasteClass::Mixed => Rgb([255, 160, 0]),
    }
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < left || bottom < top || right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}
