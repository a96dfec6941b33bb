//! Frame snapshots and the latest-wins frame buffer.
//!
//! - `Frame`: Immutable RGB8 snapshot. Pixels are private and read-only; clones share storage.
//! - `FrameBuffer`: Single-slot buffer shared by the capture thread (writer) and the
//!   classification controller (reader). Each publish discards the previous frame.
//!
//! The buffer lock is held only to swap or clone the slot, never across detection.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::SorterError;

/// Bytes per packed RGB8 pixel.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame: immutable RGB8 snapshot
// ----------------------------------------------------------------------------

/// One captured camera image.
///
/// There is no mutable access to the pixel data. Handing a frame across the
/// producer/consumer boundary clones the handle, never the bytes, and nobody can write
/// through it.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number assigned by the source.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from packed RGB8 pixels. The length must be `width * height * 3`.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SorterError::InvalidFrame(format!(
                "frame dimensions must be non-zero ({}x{})",
                width, height
            ))
            .into());
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| SorterError::InvalidFrame("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(SorterError::InvalidFrame(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ))
            .into());
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// A frame filled with one colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Result<Self> {
        let count = (width as usize) * (height as usize);
        let pixels = rgb.iter().copied().cycle().take(count * RGB_CHANNELS).collect();
        Self::from_rgb(pixels, width, height, sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len() / RGB_CHANNELS
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Fraction of pixels whose grayscale value is strictly above `luma_threshold`.
    ///
    /// Grayscale uses the ITU-R 601 weights, same as a BGR/RGB-to-gray conversion.
    pub fn white_fraction(&self, luma_threshold: u8) -> f32 {
        let total = self.pixel_count();
        if total == 0 {
            return 0.0;
        }
        let white = self
            .pixels
            .chunks_exact(RGB_CHANNELS)
            .filter(|px| luma(px[0], px[1], px[2]) > luma_threshold)
            .count();
        white as f32 / total as f32
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

// ----------------------------------------------------------------------------
// FrameBuffer: latest-wins single slot
// ----------------------------------------------------------------------------

/// Holds the most recently published frame.
///
/// `publish` replaces the slot unconditionally; `latest` returns whatever is there without
/// waiting. Older frames are dropped, not queued.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Frame>>,
    published: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame.
    pub fn publish(&self, frame: Frame) {
        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.replace(frame)
        };
        // Release the superseded frame outside the critical section.
        drop(previous);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recently published frame, or `None` before the first publish.
    pub fn latest(&self) -> Option<Frame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of publishes since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
