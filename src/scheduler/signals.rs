use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Start/pause/resume/stop coordination between callers and the worker.
///
/// The worker only observes these at the top of each loop iteration; a task
/// already executing is never interrupted. Each `begin` opens a new
/// generation so a worker left behind by a timed-out stop cannot keep
/// draining the queue after a restart.
pub struct ControlSignals {
    running: AtomicBool,
    generation: AtomicU64,
    stop: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    /// Mark running with fresh stop/pause signals.
    ///
    /// Returns the new generation, or `None` if already running.
    pub fn begin(&self) -> Option<u64> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        self.stop.store(false, Ordering::Release);
        *self.paused.lock() = false;
        Some(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Whether a worker of `generation` should keep looping
    pub fn should_continue(&self, generation: u64) -> bool {
        !self.is_stop_requested() && self.generation.load(Ordering::Acquire) == generation
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Returns false when not running or already paused
    pub fn pause(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut paused = self.paused.lock();
        if *paused {
            return false;
        }
        *paused = true;
        true
    }

    /// Returns false when not running or not paused
    pub fn resume(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut paused = self.paused.lock();
        if !*paused {
            return false;
        }
        *paused = false;
        self.resumed.notify_all();
        true
    }

    /// Raise the stop signal and wake a paused worker
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _paused = self.paused.lock();
        self.resumed.notify_all();
    }

    /// Block while paused; returns early once stop is requested
    pub fn wait_while_paused(&self) {
        let mut paused = self.paused.lock();
        while *paused && !self.is_stop_requested() {
            self.resumed.wait(&mut paused);
        }
    }

    /// Clear running and paused flags
    pub fn finish(&self) {
        *self.paused.lock() = false;
        self.running.store(false, Ordering::Release);
    }

    /// Clear flags on worker exit, unless a newer generation has started
    pub fn finish_generation(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.finish();
        }
    }
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_state_guards() {
        let signals = ControlSignals::new();
        assert!(!signals.pause());
        assert!(!signals.resume());

        assert_eq!(signals.begin(), Some(1));
        assert_eq!(signals.begin(), None);
        assert!(signals.should_continue(1));
        assert!(!signals.resume());
        assert!(signals.pause());
        assert!(!signals.pause());
        assert!(signals.is_paused());
        assert!(signals.resume());
        assert!(!signals.is_paused());

        signals.request_stop();
        assert!(signals.is_stop_requested());
        assert!(!signals.should_continue(1));
        signals.finish();
        assert!(!signals.is_running());

        assert_eq!(signals.begin(), Some(2));
        assert!(!signals.is_stop_requested());
        assert!(!signals.should_continue(1));

        // A stale worker exiting late must not clear the new run
        signals.finish_generation(1);
        assert!(signals.is_running());
        signals.finish_generation(2);
        assert!(!signals.is_running());
    }

    #[test]
    fn test_stop_wakes_paused_waiter() {
        let signals = Arc::new(ControlSignals::new());
        signals.begin();
        signals.pause();

        let waiter = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || {
                let start = Instant::now();
                signals.wait_while_paused();
                start.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(30));
        signals.request_stop();
        let waited = waiter.join().unwrap();
        assert!(waited < Duration::from_secs(5));
    }
}
