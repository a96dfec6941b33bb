//! Classification controller.
//!
//! One cycle per trigger, never overlapping:
//!
//! ```text
//! Idle -> Stabilizing -> Detecting -> Voting -> (Retry -> Detecting ...) -> Sending -> Idle
//! ```
//!
//! Everything that goes wrong inside a cycle (no frame, detector error, write failure) is
//! contained here and reported through logs and `ControllerStats`. After every trigger the
//! peer gets exactly one reply: a verdict code or the failure code.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::annotate::Annotator;
use crate::detect::{DetectionSet, DetectorBackend};
use crate::frame::{Frame, FrameBuffer};
use crate::link::{parse_trigger, TriggerChannel, WireCode};
use crate::shutdown::ShutdownToken;
use crate::verdict::{vote, Verdict};

/// Empty-surface guard run before the detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlankSurfaceCheck {
    /// Grayscale level a pixel must exceed to count as white.
    pub luma_threshold: u8,
    /// White fraction above which the frame is treated as showing no object.
    pub max_fraction: f32,
}

impl BlankSurfaceCheck {
    pub fn is_blank(&self, frame: &Frame) -> bool {
        frame.white_fraction(self.luma_threshold) > self.max_fraction
    }
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Mandatory pause after a trigger, for the chute to stop moving.
    pub settle_delay: Duration,
    /// Frame buffer polls per attempt before giving up on this attempt.
    pub frame_wait_attempts: u32,
    pub frame_wait_interval: Duration,
    /// Detection attempts per cycle, first one included.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub blank_check: Option<BlankSurfaceCheck>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Stabilizing,
    Detecting { attempt: u32 },
    Voting { attempt: u32 },
    Retry { attempt: u32 },
    Sending,
}

/// What one cycle decided and whether the peer heard about it.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub verdict: Verdict,
    pub code: WireCode,
    /// Detection attempts made.
    pub attempts: u32,
    /// Size of the detection set the verdict came from.
    pub detections: usize,
    /// The blank-surface check decided without calling the detector.
    pub short_circuit: bool,
    pub delivered: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub cycles: u64,
    /// Attempts that ended in no-result, whether or not another attempt followed.
    pub retries: u64,
    /// Cycles that ended with the failure code.
    pub failures: u64,
    pub detector_errors: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub ignored_bytes: u64,
    pub dropped_triggers: u64,
}

/// Result of one Detecting + Voting pass.
struct Attempt {
    verdict: Verdict,
    detections: DetectionSet,
    frame: Option<Frame>,
    short_circuit: bool,
}

impl Attempt {
    fn no_result(frame: Option<Frame>) -> Self {
        Self {
            verdict: Verdict::NoResult,
            detections: DetectionSet::empty(),
            frame,
            short_circuit: false,
        }
    }
}

pub struct Controller {
    settings: ControllerSettings,
    buffer: Arc<FrameBuffer>,
    detector: Box<dyn DetectorBackend>,
    channel: Box<dyn TriggerChannel>,
    annotator: Option<Box<dyn Annotator>>,
    shutdown: ShutdownToken,
    state: CycleState,
    stats: ControllerStats,
}

impl Controller {
    pub fn new(
        settings: ControllerSettings,
        buffer: Arc<FrameBuffer>,
        detector: Box<dyn DetectorBackend>,
        channel: Box<dyn TriggerChannel>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            settings,
            buffer,
            detector,
            channel,
            annotator: None,
            shutdown,
            state: CycleState::Idle,
            stats: ControllerStats::default(),
        }
    }

    pub fn with_annotator(mut self, annotator: Box<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Serve triggers until shutdown, then close the channel.
    pub fn run(mut self) -> ControllerStats {
        log::info!(
            "controller: waiting for trigger (detector={}, max_attempts={})",
            self.detector.name(),
            self.settings.max_attempts
        );
        while !self.shutdown.is_triggered() {
            if let Err(err) = self.poll_once() {
                self.stats.read_errors += 1;
                log::warn!("controller: trigger read failed: {:#}", err);
                self.shutdown.wait(self.settings.frame_wait_interval);
            }
        }
        self.channel.close();
        log::info!(
            "controller: stopped after {} cycles ({} failures, {} retries)",
            self.stats.cycles,
            self.stats.failures,
            self.stats.retries
        );
        self.stats
    }

    /// Wait up to the channel read timeout for one byte and act on it.
    ///
    /// Returns the report of the cycle the byte started, if it was a trigger.
    pub fn poll_once(&mut self) -> Result<Option<CycleReport>> {
        let Some(byte) = self.channel.read_byte()? else {
            return Ok(None);
        };
        if parse_trigger(byte).is_none() {
            self.stats.ignored_bytes += 1;
            log::trace!("controller: ignoring byte 0x{:02x}", byte);
            return Ok(None);
        }
        log::info!("controller: trigger received, starting classification");
        Ok(Some(self.run_cycle()))
    }

    /// One full classification cycle. Always ends back in `Idle`.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.stats.cycles += 1;
        let report = self.classify_and_send();
        self.drop_pending_triggers();
        self.state = CycleState::Idle;
        report
    }

    fn classify_and_send(&mut self) -> CycleReport {
        self.state = CycleState::Stabilizing;
        if !self.shutdown.wait(self.settings.settle_delay) {
            log::warn!("controller: shutdown during settle delay, replying failure");
            return self.send(Verdict::NoResult, 0, 0, false);
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt_no = 0;
        loop {
            attempt_no += 1;
            let attempt = self.attempt(attempt_no);
            if attempt.verdict == Verdict::NoResult {
                self.stats.retries += 1;
            } else {
                self.annotate(&attempt);
                return self.send(
                    attempt.verdict,
                    attempt_no,
                    attempt.detections.len(),
                    attempt.short_circuit,
                );
            }

            if attempt_no >= max_attempts {
                self.annotate(&attempt);
                log::warn!(
                    "controller: no classification after {} attempt(s)",
                    attempt_no
                );
                return self.send(Verdict::NoResult, attempt_no, 0, false);
            }

            self.state = CycleState::Retry { attempt: attempt_no };
            log::info!(
                "controller: attempt {}/{} gave no result, retrying in {}ms",
                attempt_no,
                max_attempts,
                self.settings.retry_backoff.as_millis()
            );
            if !self.shutdown.wait(self.settings.retry_backoff) {
                log::warn!("controller: shutdown during retry backoff, replying failure");
                return self.send(Verdict::NoResult, attempt_no, 0, false);
            }
        }
    }

    /// Detecting + Voting for one attempt. Failures count as a no-result attempt.
    fn attempt(&mut self, attempt: u32) -> Attempt {
        self.state = CycleState::Detecting { attempt };
        let Some(frame) = self.fetch_frame() else {
            log::warn!("controller: no frame available (attempt {})", attempt);
            return Attempt::no_result(None);
        };
        log::debug!(
            "controller: sampled frame #{} ({}ms old)",
            frame.sequence,
            frame.age().as_millis()
        );

        if let Some(check) = self.settings.blank_check {
            if check.is_blank(&frame) {
                log::info!("controller: blank surface, no object present");
                self.state = CycleState::Voting { attempt };
                return Attempt {
                    verdict: Verdict::Mixed,
                    detections: DetectionSet::empty(),
                    frame: Some(frame),
                    short_circuit: true,
                };
            }
        }

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.stats.detector_errors += 1;
                log::warn!(
                    "controller: detector {} failed (attempt {}): {:#}",
                    self.detector.name(),
                    attempt,
                    err
                );
                return Attempt::no_result(Some(frame));
            }
        };

        self.state = CycleState::Voting { attempt };
        let verdict = vote(&detections);
        if let Some(best) = detections.best() {
            log::info!(
                "controller: {} detection(s), best {} {:.2} -> {}",
                detections.len(),
                best.class,
                best.score,
                verdict
            );
        }
        Attempt {
            verdict,
            detections,
            frame: Some(frame),
            short_circuit: false,
        }
    }

    /// Poll the buffer until a frame is there or the wait budget runs out.
    fn fetch_frame(&self) -> Option<Frame> {
        let polls = self.settings.frame_wait_attempts.max(1);
        for poll in 1..=polls {
            if let Some(frame) = self.buffer.latest() {
                return Some(frame);
            }
            if poll < polls && !self.shutdown.wait(self.settings.frame_wait_interval) {
                return None;
            }
        }
        None
    }

    fn send(&mut self, verdict: Verdict, attempts: u32, detections: usize, short_circuit: bool) -> CycleReport {
        self.state = CycleState::Sending;
        let code = WireCode::for_verdict(verdict);
        if code == WireCode::Failure {
            self.stats.failures += 1;
        }
        let delivered = match self.channel.write_all(code.as_bytes()) {
            Ok(()) => {
                log::info!(
                    "controller: verdict {} sent as {:?}",
                    verdict,
                    String::from_utf8_lossy(code.as_bytes())
                );
                true
            }
            Err(err) => {
                self.stats.write_errors += 1;
                log::warn!("controller: failed to send verdict {}: {:#}", verdict, err);
                false
            }
        };
        CycleReport {
            verdict,
            code,
            attempts,
            detections,
            short_circuit,
            delivered,
        }
    }

    fn annotate(&mut self, attempt: &Attempt) {
        let (Some(annotator), Some(frame)) = (self.annotator.as_mut(), attempt.frame.as_ref()) else {
            return;
        };
        if let Err(err) = annotator.render(frame, &attempt.detections, attempt.verdict) {
            log::warn!("controller: annotation failed: {:#}", err);
        }
    }

    /// Triggers that arrived while a cycle was running are dropped, not queued.
    ///
    /// Other pending bytes (line endings after a trigger) are ignored as in `Idle`.
    fn drop_pending_triggers(&mut self) {
        let pending = match self.channel.discard_pending() {
            Ok(pending) => pending,
            Err(err) => {
                log::debug!("controller: could not clear pending input: {:#}", err);
                return;
            }
        };
        let triggers = pending
            .iter()
            .filter(|&&byte| parse_trigger(byte).is_some())
            .count();
        let ignored = pending.len() - triggers;
        if ignored > 0 {
            self.stats.ignored_bytes += ignored as u64;
            log::trace!("controller: ignoring {} pending non-trigger byte(s)", ignored);
        }
        if triggers > 0 {
            self.stats.dropped_triggers += triggers as u64;
            log::warn!(
                "controller: dropped {} trigger(s) received during the cycle",
                triggers
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_check_uses_strict_fraction() -> Result<()> {
        let check = BlankSurfaceCheck {
            luma_threshold: 240,
            max_fraction: 0.95,
        };
        assert!(check.is_blank(&Frame::solid(4, 4, [255, 255, 255], 0)?));
        assert!(!check.is_blank(&Frame::solid(4, 4, [30, 30, 30], 0)?));
        Ok(())
    }
}
