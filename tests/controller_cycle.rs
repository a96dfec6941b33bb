use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use waste_sorter::{
    BlankSurfaceCheck, BoundingBox, Controller, ControllerSettings, Detection, DetectionSet,
    Frame, FrameBuffer, ShutdownToken, StubBackend, StubResponse, TriggerChannel, Verdict,
    WasteClass, WireCode,
};

#[derive(Default)]
struct ChannelState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    fail_writes: bool,
    closes: usize,
}

/// In-memory stand-in for the serial link.
#[derive(Clone, Default)]
struct MemoryChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl MemoryChannel {
    fn push(&self, bytes: &[u8]) {
        self.state.lock().unwrap().incoming.extend(bytes);
    }

    fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

impl TriggerChannel for MemoryChannel {
    fn read_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.state.lock().unwrap().incoming.pop_front())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(anyhow!("port disconnected"));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn discard_pending(&mut self) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.incoming.drain(..).collect())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        settle_delay: Duration::from_millis(1),
        frame_wait_attempts: 2,
        frame_wait_interval: Duration::from_millis(1),
        max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        blank_check: Some(BlankSurfaceCheck {
            luma_threshold: 240,
            max_fraction: 0.95,
        }),
    }
}

fn detections(classes: &[WasteClass]) -> DetectionSet {
    DetectionSet::new(
        classes
            .iter()
            .enumerate()
            .map(|(i, class)| {
                let x = i as f32 * 40.0;
                Detection::new(BoundingBox::new(x, 10.0, x + 30.0, 60.0), 0.8, *class)
            })
            .collect(),
    )
}

fn buffer_with(frame: Frame) -> Arc<FrameBuffer> {
    let buffer = Arc::new(FrameBuffer::new());
    buffer.publish(frame);
    buffer
}

fn gray_buffer() -> Result<Arc<FrameBuffer>> {
    Ok(buffer_with(Frame::solid(64, 48, [90, 90, 90], 1)?))
}

fn controller(
    buffer: Arc<FrameBuffer>,
    backend: StubBackend,
    channel: &MemoryChannel,
) -> Controller {
    Controller::new(
        fast_settings(),
        buffer,
        Box::new(backend),
        Box::new(channel.clone()),
        ShutdownToken::new(),
    )
}

#[test]
fn organic_only_sends_zero() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3");
    let backend = StubBackend::scripted([StubResponse::Detections(detections(&[
        WasteClass::Organic,
        WasteClass::Organic,
    ]))]);
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let report = controller.poll_once()?.expect("trigger starts a cycle");

    assert_eq!(report.verdict, Verdict::Organic);
    assert_eq!(report.code, WireCode::Organic);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.detections, 2);
    assert!(report.delivered);
    assert_eq!(channel.written(), b"0");
    Ok(())
}

#[test]
fn organic_and_non_organic_send_mixed() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3");
    let backend = StubBackend::scripted([StubResponse::Detections(detections(&[
        WasteClass::Organic,
        WasteClass::NonOrganic,
    ]))]);
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let report = controller.poll_once()?.expect("trigger starts a cycle");

    assert_eq!(report.verdict, Verdict::Mixed);
    assert_eq!(channel.written(), b"2");
    Ok(())
}

#[test]
fn non_organic_only_sends_one() -> Result<()> {
    let channel = MemoryChannel::default();
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::NonOrganic]));
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let report = controller.run_cycle();

    assert_eq!(report.verdict, Verdict::NonOrganic);
    assert_eq!(channel.written(), b"1");
    Ok(())
}

#[test]
fn empty_detections_on_every_attempt_send_failure() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3");
    let backend = StubBackend::new();
    let calls = backend.call_counter();
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let report = controller.poll_once()?.expect("trigger starts a cycle");

    assert_eq!(report.verdict, Verdict::NoResult);
    assert_eq!(report.code, WireCode::Failure);
    assert_eq!(report.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(channel.written(), b"00");
    assert_eq!(controller.stats().retries, 2);
    assert_eq!(controller.stats().failures, 1);
    Ok(())
}

#[test]
fn retry_recovers_on_second_attempt() -> Result<()> {
    let channel = MemoryChannel::default();
    let backend = StubBackend::scripted([
        StubResponse::Detections(DetectionSet::empty()),
        StubResponse::Detections(detections(&[WasteClass::NonOrganic])),
    ]);
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let report = controller.run_cycle();

    assert_eq!(report.verdict, Verdict::NonOrganic);
    assert_eq!(report.attempts, 2);
    assert_eq!(channel.written(), b"1");
    Ok(())
}

#[test]
fn white_surface_short_circuits_to_mixed() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3");

    // 97 of 100 pixels pure white.
    let mut pixels = vec![255u8; 100 * 3];
    for px in pixels.chunks_exact_mut(3).take(3) {
        px.copy_from_slice(&[20, 20, 20]);
    }
    let frame = Frame::from_rgb(pixels, 10, 10, 1)?;

    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let calls = backend.call_counter();
    let mut controller = controller(buffer_with(frame), backend, &channel);

    let report = controller.poll_once()?.expect("trigger starts a cycle");

    assert_eq!(report.verdict, Verdict::Mixed);
    assert!(report.short_circuit);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(channel.written(), b"2");
    Ok(())
}

#[test]
fn non_trigger_bytes_are_ignored() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"7\n");
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let calls = backend.call_counter();
    let mut controller = controller(gray_buffer()?, backend, &channel);

    assert!(controller.poll_once()?.is_none());
    assert!(controller.poll_once()?.is_none());
    assert!(controller.poll_once()?.is_none());

    assert!(channel.written().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(controller.stats().ignored_bytes, 2);
    assert_eq!(controller.stats().cycles, 0);
    Ok(())
}

#[test]
fn detector_error_counts_as_failed_attempt() -> Result<()> {
    let channel = MemoryChannel::default();
    let backend = StubBackend::scripted([
        StubResponse::Fail("inference blew up".into()),
        StubResponse::Detections(detections(&[WasteClass::Organic])),
    ]);
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let report = controller.run_cycle();

    assert_eq!(report.verdict, Verdict::Organic);
    assert_eq!(report.attempts, 2);
    assert_eq!(controller.stats().detector_errors, 1);
    assert_eq!(channel.written(), b"0");
    Ok(())
}

#[test]
fn write_failure_is_not_fatal() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.fail_writes();
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let mut controller = controller(gray_buffer()?, backend, &channel);

    let first = controller.run_cycle();
    let second = controller.run_cycle();

    assert!(!first.delivered);
    assert!(!second.delivered);
    assert_eq!(controller.stats().write_errors, 2);
    assert_eq!(controller.stats().cycles, 2);
    Ok(())
}

#[test]
fn missing_frame_ends_in_failure() {
    let channel = MemoryChannel::default();
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let calls = backend.call_counter();
    let mut controller = controller(Arc::new(FrameBuffer::new()), backend, &channel);

    let report = controller.run_cycle();

    assert_eq!(report.code, WireCode::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(channel.written(), b"00");
}

#[test]
fn triggers_received_during_a_cycle_are_dropped() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"333");
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let mut controller = controller(gray_buffer()?, backend, &channel);

    assert!(controller.poll_once()?.is_some());
    assert!(controller.poll_once()?.is_none());

    assert_eq!(channel.written(), b"0");
    assert_eq!(controller.stats().cycles, 1);
    assert_eq!(controller.stats().dropped_triggers, 2);
    Ok(())
}

#[test]
fn shutdown_before_settle_completes_sends_failure() -> Result<()> {
    let channel = MemoryChannel::default();
    let shutdown = ShutdownToken::new();
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let mut controller = Controller::new(
        ControllerSettings {
            settle_delay: Duration::from_secs(5),
            ..fast_settings()
        },
        gray_buffer()?,
        Box::new(backend),
        Box::new(channel.clone()),
        shutdown.clone(),
    );
    shutdown.trigger();

    let report = controller.run_cycle();

    assert_eq!(report.code, WireCode::Failure);
    assert_eq!(report.attempts, 0);
    assert_eq!(channel.written(), b"00");
    Ok(())
}

#[test]
fn run_closes_channel_once_on_shutdown() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3");
    let shutdown = ShutdownToken::new();
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::NonOrganic]));
    let controller = Controller::new(
        fast_settings(),
        gray_buffer()?,
        Box::new(backend),
        Box::new(channel.clone()),
        shutdown.clone(),
    );

    let stopper = {
        let shutdown = shutdown.clone();
        let channel = channel.clone();
        std::thread::spawn(move || {
            for _ in 0..500 {
                if !channel.written().is_empty() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            shutdown.trigger();
        })
    };
    let stats = controller.run();
    stopper.join().expect("stopper thread");

    assert_eq!(stats.cycles, 1);
    assert_eq!(channel.written(), b"1");
    assert_eq!(channel.closes(), 1);
    Ok(())
}

#[test]
fn line_ending_after_trigger_is_not_a_dropped_trigger() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3\r\n");
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let mut controller = controller(gray_buffer()?, backend, &channel);

    assert!(controller.poll_once()?.is_some());

    assert_eq!(channel.written(), b"0");
    assert_eq!(controller.stats().dropped_triggers, 0);
    assert_eq!(controller.stats().ignored_bytes, 2);
    Ok(())
}

#[test]
fn second_line_oriented_trigger_mid_cycle_is_dropped_once() -> Result<()> {
    let channel = MemoryChannel::default();
    channel.push(b"3\r\n3\r\n");
    let backend = StubBackend::new().with_fallback(detections(&[WasteClass::Organic]));
    let mut controller = controller(gray_buffer()?, backend, &channel);

    assert!(controller.poll_once()?.is_some());
    assert!(controller.poll_once()?.is_none());

    assert_eq!(channel.written(), b"0");
    assert_eq!(controller.stats().cycles, 1);
    assert_eq!(controller.stats().dropped_triggers, 1);
    assert_eq!(controller.stats().ignored_bytes, 4);
    Ok(())
}

#[test]
fn single_attempt_no_result_counts_one_retry() -> Result<()> {
    let channel = MemoryChannel::default();
    let mut controller = Controller::new(
        ControllerSettings {
            max_attempts: 1,
            ..fast_settings()
        },
        gray_buffer()?,
        Box::new(StubBackend::new()),
        Box::new(channel.clone()),
        ShutdownToken::new(),
    );

    let report = controller.run_cycle();

    assert_eq!(report.code, WireCode::Failure);
    assert_eq!(report.attempts, 1);
    assert_eq!(controller.stats().retries, 1);
    assert_eq!(channel.written(), b"00");
    Ok(())
}
