//! Bounded frame queue between the capture and processing threads.
//!
//! The queue is the only data channel crossing the capture/processing
//! boundary. It enforces a hard capacity ceiling with a drop-oldest policy:
//! when full, a push evicts the longest-resident frame instead of blocking
//! the producer, so the consumer always sees the freshest frames.
//!
//! - `push` never blocks; the evicted frame (if any) is handed back so the
//!   caller can count the drop.
//! - `pop` blocks until a frame is available or the queue is closed.
//! - `close` is idempotent and wakes every blocked consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::frame::Frame;

/// Outcome of a non-blocking push.
#[derive(Debug)]
pub enum PushOutcome {
    /// Stored without eviction.
    Stored,
    /// Stored; the returned frame was evicted to make room.
    Displaced(Frame),
    /// Queue already closed; the frame is handed back untouched.
    Rejected(Frame),
}

pub struct FrameQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
}

struct Inner {
    frames: VecDeque<Frame>,
    closed: bool,
}

impl FrameQueue {
    /// Create a queue with the given capacity. Capacity is validated by
    /// configuration before the queue is built; zero is a caller bug.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Push a frame, evicting the oldest entry when at capacity.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        if inner.closed {
            return PushOutcome::Rejected(frame);
        }
        let evicted = if inner.frames.len() >= self.capacity {
            inner.frames.pop_front()
        } else {
            None
        };
        inner.frames.push_back(frame);
        self.available.notify_one();
        match evicted {
            Some(old) => PushOutcome::Displaced(old),
            None => PushOutcome::Stored,
        }
    }

    /// Pop the oldest frame, blocking until one is available. Returns `None`
    /// once the queue is closed and drained.
    pub fn pop(&self) -> Option<Frame> {
        let guard = self.inner.lock().expect("frame queue lock poisoned");
        let mut inner = self
            .available
            .wait_while(guard, |inner| inner.frames.is_empty() && !inner.closed)
            .expect("frame queue lock poisoned");
        inner.frames.pop_front()
    }

    /// Close the queue. Idempotent; wakes every blocked consumer with an
    /// end-of-stream signal. Frames already enqueued remain poppable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("frame queue lock poisoned");
        if !inner.closed {
            inner.closed = true;
            self.available.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("frame queue lock poisoned").closed
    }

    /// Current queue depth. Never blocks on a consumer; used for status
    /// reporting.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("frame queue lock poisoned")
            .frames
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::solid_frame;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(seq: u64) -> Frame {
        solid_frame(seq, 2, 2, 0)
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let queue = FrameQueue::new(3);
        for seq in 1..=10 {
            queue.push(frame(seq));
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn full_push_evicts_exactly_the_oldest() {
        let queue = FrameQueue::new(2);
        assert!(matches!(queue.push(frame(1)), PushOutcome::Stored));
        assert!(matches!(queue.push(frame(2)), PushOutcome::Stored));

        match queue.push(frame(3)) {
            PushOutcome::Displaced(old) => assert_eq!(old.seq, 1),
            other => panic!("expected displacement, got {:?}", other),
        }

        assert_eq!(queue.pop().unwrap().seq, 2);
        assert_eq!(queue.pop().unwrap().seq, 3);
    }

    #[test]
    fn pop_preserves_fifo_order() {
        let queue = FrameQueue::new(8);
        for seq in 1..=5 {
            queue.push(frame(seq));
        }
        for seq in 1..=5 {
            assert_eq!(queue.pop().unwrap().seq, seq);
        }
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(FrameQueue::new(2));
        let consumer_queue = Arc::clone(&queue);
        let consumer = std::thread::spawn(move || consumer_queue.pop());

        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        queue.close(); // idempotent

        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn closed_queue_rejects_pushes_but_drains_existing() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1));
        queue.close();

        assert!(matches!(queue.push(frame(2)), PushOutcome::Rejected(_)));
        assert_eq!(queue.pop().unwrap().seq, 1);
        assert!(queue.pop().is_none());
    }
}
