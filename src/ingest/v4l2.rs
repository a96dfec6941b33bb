//! V4L2 frame source.
//!
//! Captures from a local USB camera node (e.g. /dev/video0). RGB3 is requested; if the
//! driver negotiates YUYV, NV12 or MJPG instead, buffers are normalised to RGB8 at capture.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::config::CameraSettings;
use crate::frame::Frame;

const CAPTURE_BUFFERS: u32 = 4;

pub struct V4l2Source {
    settings: CameraSettings,
    state: Option<DeviceV4l2State>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
        }
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.settings.device
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} negotiated unsupported pixel format {}",
                self.settings.device,
                format.fourcc
            )
        })?;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.settings.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceV4l2State::try_new(device, |device| {
            v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.settings.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let pixels = state.with_stream_mut(|stream| -> Result<Vec<u8>> {
            let (buf, _meta) = stream.next().context("capture v4l2 frame")?;
            normalize_to_rgb(buf, width, height, format)
        })?;

        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, self.frame_count)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.settings.device);
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

    #[test]
    fn read_before_connect_fails() {
        let mut source = V4l2Source::new(CameraSettings {
            device: "/dev/video-missing".to_string(),
            ..CameraSettings::default()
        });
        assert!(source.next_frame().is_err());
        source.close();
    }

    #[test]
    fn missing_device_fails_to_connect() {
        let mut source = V4l2Source::new(CameraSettings {
            device: "/dev/video-missing".to_string(),
            ..CameraSettings::default()
        });
        assert!(source.connect().is_err());
    }
}
