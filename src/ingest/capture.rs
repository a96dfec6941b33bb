//! Capture loop: the single writer of the shared `FrameBuffer`.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::{Frame, FrameBuffer};
use crate::shutdown::ShutdownToken;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub read_errors: u64,
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    shutdown: ShutdownToken,
    retry_delay: Duration,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        buffer: Arc<FrameBuffer>,
        shutdown: ShutdownToken,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            buffer,
            shutdown,
            retry_delay,
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> Result<CaptureHandle> {
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || self.run())
            .context("spawn capture thread")?;
        Ok(CaptureHandle { join: Some(join) })
    }

    /// Publish frames until shutdown, then close the source.
    ///
    /// Read failures never end the loop: the source gets `retry_delay` to recover.
    pub fn run(mut self) -> CaptureStats {
        let mut stats = CaptureStats::default();
        let mut last_health_log = Instant::now();

        while !self.shutdown.is_triggered() {
            match self.source.next_frame() {
                Ok(frame) => {
                    log::trace!("capture: frame #{} from {}", frame.sequence, self.source.name());
                    self.buffer.publish(frame);
                    stats.frames += 1;
                }
                Err(err) => {
                    stats.read_errors += 1;
                    log::warn!(
                        "capture: read from {} failed ({} so far): {:#}",
                        self.source.name(),
                        stats.read_errors,
                        err
                    );
                    self.shutdown.wait(self.retry_delay);
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = self.source.stats();
                log::debug!(
                    "capture: device={} frames={} read_errors={}",
                    source_stats.device,
                    source_stats.frames_captured,
                    stats.read_errors
                );
                last_health_log = Instant::now();
            }
        }

        self.source.close();
        log::info!(
            "capture: stopped after {} frames ({} read errors)",
            stats.frames,
            stats.read_errors
        );
        stats
    }
}

/// Read the next frame, pausing `retry_delay` after each failed read.
///
/// Returns `None` only once shutdown is triggered.
pub fn read_with_retry(
    source: &mut dyn FrameSource,
    shutdown: &ShutdownToken,
    retry_delay: Duration,
) -> Option<Frame> {
    while !shutdown.is_triggered() {
        match source.next_frame() {
            Ok(frame) => return Some(frame),
            Err(err) => {
                log::warn!("capture: read from {} failed: {:#}", source.name(), err);
                shutdown.wait(retry_delay);
            }
        }
    }
    None
}

#[derive(Debug)]
pub struct CaptureHandle {
    join: Option<JoinHandle<CaptureStats>>,
}

impl CaptureHandle {
    /// Wait for the capture thread. Trigger shutdown first or this blocks forever.
    pub fn join(mut self) -> Result<CaptureStats> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("capture thread already joined"))?;
        join.join()
            .map_err(|_| anyhow!("capture thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SourceStats;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every other read; counts closes.
    struct FlakySource {
        reads: u64,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            self.reads += 1;
            std::thread::sleep(Duration::from_millis(1));
            if self.reads % 2 == 0 {
                return Err(anyhow!("transient read failure"));
            }
            Frame::solid(2, 2, [1, 2, 3], self.reads)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.reads,
                device: "flaky".into(),
            }
        }
    }

    #[test]
    fn capture_survives_read_errors_and_closes_once() -> Result<()> {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = FlakySource {
            reads: 0,
            closes: closes.clone(),
        };
        let buffer = Arc::new(FrameBuffer::new());
        let shutdown = ShutdownToken::new();
        let handle = CaptureLoop::new(
            Box::new(source),
            buffer.clone(),
            shutdown.clone(),
            Duration::from_millis(1),
        )
        .spawn()?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.published() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        shutdown.trigger();
        let stats = handle.join()?;

        assert!(stats.frames >= 3);
        assert!(stats.read_errors >= 2);
        assert_eq!(stats.frames, buffer.published());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn read_with_retry_skips_failed_reads() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut source = FlakySource {
            reads: 1,
            closes,
        };
        let shutdown = ShutdownToken::new();

        // Read 2 fails, read 3 succeeds.
        let frame = read_with_retry(&mut source, &shutdown, Duration::from_millis(1))
            .expect("frame after a failed read");
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn read_with_retry_stops_on_shutdown() {
        let mut source = FlakySource {
            reads: 0,
            closes: Arc::new(AtomicUsize::new(0)),
        };
        let shutdown = ShutdownToken::new();
        shutdown.trigger();

        assert!(read_with_retry(&mut source, &shutdown, Duration::from_millis(1)).is_none());
        assert_eq!(source.reads, 0);
    }
}
