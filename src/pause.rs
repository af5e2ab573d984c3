//! Pause gate for dynamic concurrency adjustment
//!
//! The controller raises or lowers a shared pause index; workers whose
//! index is at or above it park on a condition variable until the next
//! broadcast. Lowering concurrency therefore never destroys a worker, it
//! only puts it to sleep.

use std::sync::{Condvar, Mutex, PoisonError};

/// Shared pause index plus its wake signal
///
/// A worker with index `i` is active while `i < pause_index`. The index is
/// only ever mutated under the wake mutex, and workers re-check it under
/// the same mutex before sleeping; this ordering is what prevents a missed
/// broadcast from stranding a worker.
pub struct PauseGate {
    index: Mutex<usize>,
    wake: Condvar,
}

impl PauseGate {
    /// Create a gate with every worker paused (`pause_index = 0`)
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: Mutex::new(0),
            wake: Condvar::new(),
        }
    }

    /// Set the number of active workers and wake everyone to re-evaluate
    pub fn set_active_count(&self, count: usize) {
        {
            let mut index = self
                .index
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *index = count;
        }
        self.wake.notify_all();
    }

    /// Current pause index
    #[must_use]
    pub fn active_count(&self) -> usize {
        *self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block the calling worker while `worker_index >= pause_index`
    ///
    /// Returns immediately when the worker is already active.
    pub fn wait_while_paused(&self, worker_index: usize) {
        let mut index = self
            .index
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while worker_index >= *index {
            index = self
                .wake
                .wait(index)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initial_index_is_zero() {
        let gate = PauseGate::new();
        assert_eq!(gate.active_count(), 0);
    }

    #[test]
    fn test_active_worker_does_not_block() {
        let gate = PauseGate::new();
        gate.set_active_count(2);
        gate.wait_while_paused(0);
        gate.wait_while_paused(1);
    }

    #[test]
    fn test_paused_worker_wakes_on_raise() {
        let gate = Arc::new(PauseGate::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for worker_index in 0..3 {
            let gate = Arc::clone(&gate);
            let woken = Arc::clone(&woken);
            handles.push(std::thread::spawn(move || {
                gate.wait_while_paused(worker_index);
                woken.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // All three start paused.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(woken.load(Ordering::SeqCst), 0);

        // Raising to 2 releases workers 0 and 1 but not 2.
        gate.set_active_count(2);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(woken.load(Ordering::SeqCst), 2);

        // Raising past every index releases the rest.
        gate.set_active_count(3);
        for handle in handles {
            handle.join().expect("worker thread");
        }
        assert_eq!(woken.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_lowering_keeps_new_workers_paused() {
        let gate = PauseGate::new();
        gate.set_active_count(4);
        gate.set_active_count(1);
        assert_eq!(gate.active_count(), 1);

        let gate = Arc::new(gate);
        let passed = Arc::new(AtomicUsize::new(0));
        let handle = {
            let gate = Arc::clone(&gate);
            let passed = Arc::clone(&passed);
            std::thread::spawn(move || {
                gate.wait_while_paused(2);
                passed.fetch_add(1, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        gate.set_active_count(3);
        handle.join().expect("worker thread");
        assert_eq!(passed.load(Ordering::SeqCst), 1);
    }
}
