use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionSet;
use crate::frame::Frame;

/// One scripted detector response.
#[derive(Clone, Debug)]
pub enum StubResponse {
    Detections(DetectionSet),
    Fail(String),
}

/// Scripted backend for tests and hardware-free runs.
///
/// Responses are consumed in order; once the script is exhausted every call returns the
/// fallback (an empty set unless overridden).
pub struct StubBackend {
    script: VecDeque<StubResponse>,
    fallback: DetectionSet,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: DetectionSet::empty(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn scripted(responses: impl IntoIterator<Item = StubResponse>) -> Self {
        Self {
            script: responses.into_iter().collect(),
            ..Self::new()
        }
    }

    pub fn with_fallback(mut self, fallback: DetectionSet) -> Self {
        self.fallback = fallback;
        self
    }

    /// Shared handle to the number of `detect` calls made so far.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(StubResponse::Detections(set)) => Ok(set),
            Some(StubResponse::Fail(reason)) => Err(anyhow!("stub detector failure: {}", reason)),
            None => Ok(self.fallback.clone()),
        }
    }
}
