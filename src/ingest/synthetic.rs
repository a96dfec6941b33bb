//! Synthetic frame source for `stub://` devices.
//!
//! - `stub://white`: an empty, all-white sensing surface
//! - `stub://dark`: a dark frame
//! - any other `stub://` name: a moving gradient with light noise

use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::config::CameraSettings;
use crate::frame::{Frame, RGB_CHANNELS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scene {
    White,
    Dark,
    Pattern,
}

pub struct SyntheticSource {
    settings: CameraSettings,
    scene: Scene,
    frame_count: u64,
    connected: bool,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(settings: CameraSettings) -> Self {
        let scene = match settings.device.trim_start_matches("stub://") {
            "white" => Scene::White,
            "dark" => Scene::Dark,
            _ => Scene::Pattern,
        };
        Self {
            settings,
            scene,
            frame_count: 0,
            connected: false,
            last_frame_at: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.settings.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / self.settings.target_fps as u64)
        }
    }

    fn pace(&mut self) {
        let interval = self.frame_interval();
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let len = (self.settings.width as usize) * (self.settings.height as usize) * RGB_CHANNELS;
        match self.scene {
            Scene::White => vec![255u8; len],
            Scene::Dark => vec![12u8; len],
            Scene::Pattern => {
                let mut rng = rand::thread_rng();
                let shift = self.frame_count;
                (0..len)
                    .map(|i| {
                        let base = ((i as u64 / RGB_CHANNELS as u64 + shift) % 200) as u8;
                        base.saturating_add(rng.gen_range(0..8))
                    })
                    .collect()
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, synthetic)",
            self.settings.device,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("{} not connected", self.settings.device));
        }
        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.settings.width, self.settings.height, self.frame_count)
    }

    fn close(&mut self) {
        if self.connected {
            self.connected = false;
            log::info!("SyntheticSource: closed {}", self.settings.device);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.settings.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_settings(device: &str) -> CameraSettings {
        CameraSettings {
            device: device.to_string(),
            width: 16,
            height: 8,
            target_fps: 0,
            ..CameraSettings::default()
        }
    }

    #[test]
    fn white_scene_is_blank_surface() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings("stub://white"));
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!(frame.white_fraction(240), 1.0);
        Ok(())
    }

    #[test]
    fn pattern_scene_is_not_blank() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings("stub://bench"));
        source.connect()?;
        let frame = source.next_frame()?;
        assert!(frame.white_fraction(240) < 0.5);
        Ok(())
    }

    #[test]
    fn frames_are_numbered_in_order() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings("stub://bench"));
        source.connect()?;
        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert!(second.sequence > first.sequence);
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn read_before_connect_fails() {
        let mut source = SyntheticSource::new(stub_settings("stub://bench"));
        assert!(source.next_frame().is_err());
    }
}
