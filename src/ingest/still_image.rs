//! Still-image frame source.
//!
//! Decodes a local JPEG or PNG once on connect and hands out the same scene on every read.
//! Used to classify saved pictures with the same pipeline as the live camera.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const STILL_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub fn is_still_image_path(device: &str) -> bool {
    if device.contains("://") {
        return false;
    }
    Path::new(device)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            STILL_IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

pub struct StillImageSource {
    path: PathBuf,
    display: String,
    scene: Option<Frame>,
    frame_count: u64,
}

impl StillImageSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            display: path.display().to_string(),
            path,
            scene: None,
            frame_count: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> &str {
        &self.display
    }

    fn connect(&mut self) -> Result<()> {
        let image = image::open(&self.path)
            .with_context(|| format!("failed to decode image {}", self.path.display()))?
            .into_rgb8();
        let (width, height) = image.dimensions();
        self.scene = Some(Frame::from_rgb(image.into_raw(), width, height, 0)?);
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            self.path.display(),
            width,
            height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let scene = self
            .scene
            .as_ref()
            .ok_or_else(|| anyhow!("{} not loaded", self.path.display()))?;
        self.frame_count += 1;
        Ok(scene.clone())
    }

    fn close(&mut self) {
        self.scene = None;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.display.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn recognises_image_extensions() {
        assert!(is_still_image_path("sample.jpg"));
        assert!(is_still_image_path("/tmp/Sample.PNG"));
        assert!(is_still_image_path("shots/a.jpeg"));
        assert!(!is_still_image_path("/dev/video0"));
        assert!(!is_still_image_path("http://camera/frame.jpg"));
    }

    #[test]
    fn replays_decoded_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scene.png");
        let mut image = RgbImage::new(6, 4);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.save(&path)?;

        let mut source = StillImageSource::new(&path);
        source.connect()?;
        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!((first.width, first.height), (6, 4));
        assert_eq!(&first.pixels()[..3], &[255, 0, 0]);
        assert_eq!(first.pixels(), second.pixels());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }
}
