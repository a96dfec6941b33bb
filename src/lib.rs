//! Waste sorter
//!
//! Classifies the object sitting on a sorting chute and tells the chute controller board
//! where to drop it.
//!
//! # Architecture
//!
//! Two concurrent activities share one latest-wins frame slot:
//!
//! 1. **Capture**: a dedicated thread reads the camera continuously and publishes each
//!    frame into the `FrameBuffer`, replacing the previous one.
//! 2. **Control**: the controller waits for a trigger byte on the serial link, lets the
//!    chute settle, samples the newest frame, runs the detector, votes, and answers with a
//!    single verdict code (or the failure code after exhausting its retries).
//!
//! Wire protocol (ASCII, unframed): `'3'` is the trigger; `'0'` organic, `'1'`
//! non-organic, `'2'` mixed; `"00"` means classification failed.
//!
//! # Module Structure
//!
//! - `frame`: immutable RGB frames and the shared `FrameBuffer`
//! - `ingest`: frame sources (V4L2, still images, synthetic) and the capture loop
//! - `detect`: detector backends (tract ONNX, scripted stub) and YOLO post-processing
//! - `verdict`: voting over a detection set
//! - `link`: trigger protocol and the serial link
//! - `controller`: the classification cycle state machine
//! - `annotate`: optional annotated snapshots of classified frames

pub mod annotate;
pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod link;
pub mod shutdown;
pub mod verdict;

pub use annotate::{Annotator, SnapshotAnnotator};
pub use config::{CameraSettings, DetectorSettings, SerialSettings, SorterConfig};
pub use controller::{
    BlankSurfaceCheck, Controller, ControllerSettings, ControllerStats, CycleReport, CycleState,
};
pub use detect::{
    load_backend, BoundingBox, Detection, DetectionSet, DetectorBackend, StubBackend,
    StubResponse, WasteClass,
};
pub use error::SorterError;
pub use frame::{Frame, FrameBuffer};
pub use ingest::{open_source, CaptureHandle, CaptureLoop, CaptureStats, FrameSource};
pub use link::{SerialLink, TriggerChannel, WireCode, TRIGGER_BYTE};
pub use shutdown::ShutdownToken;
pub use verdict::{vote, Verdict};
