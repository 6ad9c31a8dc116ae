//! Worker threads owned by a recovery strategy.
//!
//! Every worker shares the pool's stop signal. Shutting the pool down wakes
//! all of them and joins each one, except the calling thread itself when the
//! last owner of a strategy is released from inside one of its own workers.

use super::signal::StopSignal;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error};

pub(crate) struct WorkerPool {
    name: &'static str,
    stop: Arc<StopSignal>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name, stop: Arc::new(StopSignal::new()), handles: Mutex::new(Vec::new()) }
    }

    /// Run `task` on a new named thread; finished workers are reaped first.
    pub(crate) fn spawn<F>(&self, task: F) -> std::io::Result<()>
    where
        F: FnOnce(&StopSignal) + Send + 'static,
    {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let (finished, running): (Vec<_>, Vec<_>) =
            handles.drain(..).partition(JoinHandle::is_finished);
        *handles = running;
        for handle in finished {
            if handle.join().is_err() {
                error!(pool = self.name, "Worker panicked");
            }
        }

        let stop = Arc::clone(&self.stop);
        let handle = std::thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || task(&stop))?;
        handles.push(handle);
        Ok(())
    }

    /// Stop every worker and join all but the current thread.
    ///
    /// Returns the number of workers joined.
    pub(crate) fn shutdown(&self) -> usize {
        self.stop.stop();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        let current = std::thread::current().id();
        let mut joined = 0;
        for handle in handles {
            if handle.thread().id() == current {
                debug!(pool = self.name, "Released from its own worker, detaching it");
                continue;
            }
            if handle.join().is_err() {
                error!(pool = self.name, "Worker panicked");
            }
            joined += 1;
        }
        joined
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
