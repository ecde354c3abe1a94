//! Pending-hit queue feeding `wait-for-hit` callers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use tracing::debug;

use crate::types::BreakpointHit;

/// Outcome of a bounded wait on the queue.
#[derive(Debug)]
pub enum WaitOutcome {
    /// Exactly one hit, removed from the queue.
    Hit(BreakpointHit),
    /// The deadline passed with no matching hit; queued hits are kept.
    Timeout,
    /// The queue was closed (session teardown or process exit).
    Cancelled,
}

#[derive(Debug, Default)]
struct QueueInner {
    queue: VecDeque<BreakpointHit>,
    closed: bool,
}

/// FIFO hit queue with deadline waits. Hits only accumulate while no
/// waiter is blocked, so the queue stays small in practice. Cancellation
/// (close) is distinct from timeout and never drops queued hits until
/// [`HitQueue::drain`] runs.
#[derive(Debug, Default)]
pub struct HitQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl HitQueue {
    /// Create an open, empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hit and wake one waiter. Hits enqueued after close are
    /// dropped.
    pub fn enqueue(&self, hit: BreakpointHit) {
        let mut inner = self.inner.lock().expect("hit queue poisoned");
        if inner.closed {
            debug!(breakpoint = %hit.breakpoint_id, "dropping hit after queue close");
            return;
        }
        inner.queue.push_back(hit);
        drop(inner);
        self.available.notify_one();
    }

    /// Wait for the next hit until `deadline`. With a `breakpoint_id`
    /// filter only a matching hit is removed; other hits stay queued in
    /// order for the next waiter.
    pub fn dequeue(&self, deadline: Instant, breakpoint_id: Option<&str>) -> WaitOutcome {
        let mut inner = self.inner.lock().expect("hit queue poisoned");
        loop {
            if let Some(position) = inner
                .queue
                .iter()
                .position(|hit| breakpoint_id.is_none_or(|id| hit.breakpoint_id == id))
            {
                let hit = inner.queue.remove(position).expect("position just found");
                return WaitOutcome::Hit(hit);
            }
            if inner.closed {
                return WaitOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Timeout;
            }
            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .expect("hit queue poisoned");
            inner = guard;
        }
    }

    /// Close the queue: current and future waiters observe `Cancelled`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("hit queue poisoned");
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    /// Reopen after a close (next session).
    pub fn reopen(&self) {
        let mut inner = self.inner.lock().expect("hit queue poisoned");
        inner.closed = false;
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<BreakpointHit> {
        let mut inner = self.inner.lock().expect("hit queue poisoned");
        inner.queue.drain(..).collect()
    }

    /// Number of queued hits.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().expect("hit queue poisoned").queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceLocation;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn hit(id: &str, count: u64) -> BreakpointHit {
        BreakpointHit {
            breakpoint_id: id.into(),
            thread_id: 1,
            timestamp: crate::types::now_timestamp(),
            location: SourceLocation::new("/src/a.cs", 1),
            hit_count: count,
            exception: None,
        }
    }

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn hits_dequeue_in_order() {
        let queue = HitQueue::new();
        queue.enqueue(hit("bp-1", 1));
        queue.enqueue(hit("bp-2", 1));
        queue.enqueue(hit("bp-1", 2));

        let first = queue.dequeue(soon(10), None);
        let second = queue.dequeue(soon(10), None);
        let third = queue.dequeue(soon(10), None);
        match (first, second, third) {
            (WaitOutcome::Hit(a), WaitOutcome::Hit(b), WaitOutcome::Hit(c)) => {
                assert_eq!(a.breakpoint_id, "bp-1");
                assert_eq!(a.hit_count, 1);
                assert_eq!(b.breakpoint_id, "bp-2");
                assert_eq!(c.hit_count, 2);
            }
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn empty_queue_times_out() {
        let queue = HitQueue::new();
        assert!(matches!(queue.dequeue(soon(20), None), WaitOutcome::Timeout));
    }

    #[test]
    fn filtered_wait_leaves_other_hits_queued() {
        let queue = HitQueue::new();
        queue.enqueue(hit("bp-1", 1));
        queue.enqueue(hit("bp-2", 1));

        let matched = queue.dequeue(soon(10), Some("bp-2"));
        assert!(matches!(matched, WaitOutcome::Hit(h) if h.breakpoint_id == "bp-2"));
        assert_eq!(queue.pending_len(), 1);
        let remaining = queue.dequeue(soon(10), None);
        assert!(matches!(remaining, WaitOutcome::Hit(h) if h.breakpoint_id == "bp-1"));
    }

    #[test]
    fn waiter_wakes_when_hit_arrives() {
        let queue = Arc::new(HitQueue::new());
        let waiter = Arc::clone(&queue);
        let handle = thread::spawn(move || waiter.dequeue(soon(2_000), None));
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(hit("bp-1", 1));
        assert!(matches!(handle.join().unwrap(), WaitOutcome::Hit(_)));
    }

    #[test]
    fn close_cancels_waiters_but_keeps_queued_hits() {
        let queue = Arc::new(HitQueue::new());
        queue.enqueue(hit("bp-1", 1));

        let waiter = Arc::clone(&queue);
        let handle = thread::spawn(move || waiter.dequeue(soon(2_000), Some("bp-9")));
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(matches!(handle.join().unwrap(), WaitOutcome::Cancelled));

        // The unmatched hit survived the cancellation.
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.drain().len(), 1);
    }
}
