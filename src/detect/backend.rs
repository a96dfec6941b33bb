use anyhow::Result;

use crate::detect::result::DetectionSet;
use crate::frame::Frame;

/// Object detector collaborator.
///
/// Implementations apply their own confidence cutoff; callers never re-filter the returned
/// set. A call has no observable state carried over to the next call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Errors are per-call failures (bad input, runtime fault, unknown class id); the caller
    /// decides whether to retry.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
