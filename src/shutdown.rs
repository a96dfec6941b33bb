use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep inside `ShutdownToken::wait`.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Cooperative cancellation shared by the capture thread and the controller loop.
///
/// Loops check `is_triggered` at their head; every pause goes through `wait` so a
/// shutdown request is seen within one slice.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when the full duration elapsed, `false` on shutdown.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_completes_without_shutdown() {
        let token = ShutdownToken::new();
        assert!(token.wait(Duration::from_millis(5)));
        assert!(token.wait(Duration::ZERO));
    }

    #[test]
    fn wait_returns_early_on_shutdown() {
        let token = ShutdownToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.trigger();
        });
        let started = Instant::now();
        assert!(!token.wait(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().expect("trigger thread");
    }
}
