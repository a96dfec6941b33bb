//! Frame sources and the capture loop.
//!
//! Sources produce `Frame` instances that the capture loop publishes into the shared
//! `FrameBuffer`:
//! - `stub://` synthetic scenes (testing, hardware-free runs)
//! - Still images (`.jpg`, `.jpeg`, `.png`) replayed as a constant scene
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! A source that cannot be opened at startup is `DeviceUnavailable`. Read failures after that
//! are transient: the capture loop pauses and retries.

pub mod capture;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod still_image;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::config::CameraSettings;
use crate::error::SorterError;
use crate::frame::Frame;

pub use capture::{read_with_retry, CaptureHandle, CaptureLoop, CaptureStats};
pub use still_image::StillImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Camera collaborator.
pub trait FrameSource: Send {
    /// Device or path this source reads from.
    fn name(&self) -> &str;

    /// Open the device. Failure here means there is nothing to classify.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Build and connect the source named by `settings.device`.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let mut source = build_source(settings)?;
    source.connect().map_err(|err| {
        SorterError::device_unavailable(&settings.device, format!("{:#}", err))
    })?;
    Ok(source)
}

fn build_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if still_image::is_still_image_path(&settings.device) {
        return Ok(Box::new(StillImageSource::new(&settings.device)));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(settings.clone())))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(SorterError::device_unavailable(
            &settings.device,
            "camera devices require the ingest-v4l2 feature",
        )
        .into())
    }
}
