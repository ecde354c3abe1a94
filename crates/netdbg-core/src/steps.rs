//! Step-completion synchronization.
//!
//! Step requests are synchronous for callers: the controller arms the
//! target's stepper, then blocks here until the pump records the
//! matching step-complete event or the deadline passes.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use crate::target::RawFrame;

/// Why a step wait ended without a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepWaitError {
    /// The deadline passed first. The runtime may still deliver the
    /// completion later; the pump discards completions nobody waits for.
    Timeout,
    /// The session tore down while waiting.
    Cancelled,
}

#[derive(Debug)]
enum StepSlot {
    InFlight,
    Complete(RawFrame),
}

#[derive(Debug, Default)]
struct TrackerInner {
    slots: HashMap<u32, StepSlot>,
    cancelled: bool,
}

/// Tracks in-flight steps per thread.
#[derive(Debug, Default)]
pub struct StepTracker {
    inner: Mutex<TrackerInner>,
    done: Condvar,
}

impl StepTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a step was armed on a thread.
    pub fn begin(&self, thread_id: u32) {
        let mut inner = self.inner.lock().expect("step tracker poisoned");
        inner.cancelled = false;
        inner.slots.insert(thread_id, StepSlot::InFlight);
    }

    /// Record a step completion. Completions for threads nobody armed
    /// are ignored (a stale completion after a timeout).
    pub fn complete(&self, thread_id: u32, frame: RawFrame) {
        let mut inner = self.inner.lock().expect("step tracker poisoned");
        if let Some(slot) = inner.slots.get_mut(&thread_id) {
            *slot = StepSlot::Complete(frame);
            drop(inner);
            self.done.notify_all();
        }
    }

    /// True when a step is armed on the thread.
    #[must_use]
    pub fn in_flight(&self, thread_id: u32) -> bool {
        let inner = self.inner.lock().expect("step tracker poisoned");
        matches!(inner.slots.get(&thread_id), Some(StepSlot::InFlight))
    }

    /// Block until the thread's step completes or `deadline` passes.
    pub fn wait(&self, thread_id: u32, deadline: Instant) -> Result<RawFrame, StepWaitError> {
        let mut inner = self.inner.lock().expect("step tracker poisoned");
        loop {
            if inner.cancelled {
                inner.slots.remove(&thread_id);
                return Err(StepWaitError::Cancelled);
            }
            if let Some(StepSlot::Complete(_)) = inner.slots.get(&thread_id) {
                let Some(StepSlot::Complete(frame)) = inner.slots.remove(&thread_id) else {
                    unreachable!("slot checked above");
                };
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                inner.slots.remove(&thread_id);
                return Err(StepWaitError::Timeout);
            }
            let (guard, _) = self
                .done
                .wait_timeout(inner, deadline - now)
                .expect("step tracker poisoned");
            inner = guard;
        }
    }

    /// Drop an armed step that never started (arming the target failed).
    pub fn abort(&self, thread_id: u32) {
        let mut inner = self.inner.lock().expect("step tracker poisoned");
        inner.slots.remove(&thread_id);
    }

    /// Cancel every waiter (session teardown).
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("step tracker poisoned");
        inner.cancelled = true;
        drop(inner);
        self.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn frame() -> RawFrame {
        RawFrame {
            method: None,
            module_path: None,
            module_name: "app".into(),
            function: "Main".into(),
            il_offset: Some(4),
            is_native: false,
        }
    }

    #[test]
    fn wait_returns_completed_frame() {
        let tracker = Arc::new(StepTracker::new());
        tracker.begin(3);
        let waiter = Arc::clone(&tracker);
        let handle =
            thread::spawn(move || waiter.wait(3, Instant::now() + Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(20));
        tracker.complete(3, frame());
        let completed = handle.join().unwrap().unwrap();
        assert_eq!(completed.il_offset, Some(4));
    }

    #[test]
    fn wait_times_out_and_clears_the_slot() {
        let tracker = StepTracker::new();
        tracker.begin(1);
        let result = tracker.wait(1, Instant::now() + Duration::from_millis(20));
        assert_eq!(result.unwrap_err(), StepWaitError::Timeout);
        assert!(!tracker.in_flight(1));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let tracker = StepTracker::new();
        tracker.complete(9, frame());
        assert!(!tracker.in_flight(9));
    }

    #[test]
    fn cancel_wakes_waiters() {
        let tracker = Arc::new(StepTracker::new());
        tracker.begin(2);
        let waiter = Arc::clone(&tracker);
        let handle =
            thread::spawn(move || waiter.wait(2, Instant::now() + Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        tracker.cancel_all();
        assert_eq!(handle.join().unwrap().unwrap_err(), StepWaitError::Cancelled);
    }
}
