//! Stop signal shared between an owner and its background thread.
//!
//! Background loops wait on the signal instead of sleeping so that a stop
//! request wakes them immediately rather than after the remaining delay.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request stop and wake every waiter.
    pub(crate) fn stop(&self) {
        *self.lock() = true;
        self.cv.notify_all();
    }

    /// Re-arm the signal before starting a new loop.
    pub(crate) fn reset(&self) {
        *self.lock() = false;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.lock()
    }

    /// Wait up to `timeout`. Returns `true` if stop was requested.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _timed_out) = self
            .cv
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_without_stop() {
        let signal = StopSignal::new();
        assert!(!signal.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_stop_wakes_waiter_early() {
        let signal = Arc::new(StopSignal::new());
        let waiter = Arc::clone(&signal);
        let started = Instant::now();
        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(30)));

        std::thread::sleep(Duration::from_millis(20));
        signal.stop();

        assert!(handle.join().unwrap_or(false));
        assert!(started.elapsed() < Duration::from_secs(5));
        signal.reset();
        assert!(!signal.is_stopped());
    }
}
