//! Pending request queue with bounded retries.
//!
//! Requests are served strictly in FIFO order with at most one in flight.
//! The head advances when its response arrives ([`complete`]) or when its
//! retry budget runs out ([`retry`] returning [`Retry::GaveUp`]).
//!
//! ```rust
//! use rs_trackside::kernel::{PendingRequestQueue, Retry};
//!
//! let mut queue: PendingRequestQueue<u8, 4> = PendingRequestQueue::new(2);
//! assert!(queue.push(1));
//! assert!(queue.push(2));
//!
//! assert_eq!(queue.send_next(), Some(&1));
//! assert_eq!(queue.send_next(), None); // 1 still in flight
//!
//! assert_eq!(queue.retry(), Retry::Resend(&1));
//! assert_eq!(queue.retry(), Retry::GaveUp(1));
//! assert_eq!(queue.send_next(), Some(&2));
//! ```
//!
//! [`complete`]: PendingRequestQueue::complete
//! [`retry`]: PendingRequestQueue::retry

use heapless::Deque;

/// Outcome of a request timeout.
#[derive(Debug, PartialEq, Eq)]
pub enum Retry<'a, R> {
    /// Send the head again.
    Resend(&'a R),
    /// Budget spent, head removed.
    GaveUp(R),
    /// Nothing in flight.
    Idle,
}

/// FIFO of outstanding requests, capacity `N`.
#[derive(Debug)]
pub struct PendingRequestQueue<R, const N: usize> {
    queue: Deque<R, N>,
    attempts: u8,
    max_attempts: u8,
    in_flight: bool,
}

impl<R, const N: usize> PendingRequestQueue<R, N> {
    /// Creates an empty queue allowing `max_attempts` sends per request.
    pub fn new(max_attempts: u8) -> Self {
        Self {
            queue: Deque::new(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            in_flight: false,
        }
    }

    /// Change the retry budget; applies from the next send.
    pub fn set_max_attempts(&mut self, max_attempts: u8) {
        self.max_attempts = max_attempts.max(1);
    }

    /// Append a request. Returns false when full.
    #[must_use]
    pub fn push(&mut self, request: R) -> bool {
        self.queue.push_back(request).is_ok()
    }

    /// Head of the queue.
    pub fn head(&self) -> Option<&R> {
        self.queue.front()
    }

    /// True while the head has been sent and not completed.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// If nothing is in flight, mark the head as sent and return it.
    pub fn send_next(&mut self) -> Option<&R> {
        if self.in_flight {
            return None;
        }
        let head = self.queue.front()?;
        self.in_flight = true;
        self.attempts = 1;
        Some(head)
    }

    /// The head got its response: remove and return it.
    pub fn complete(&mut self) -> Option<R> {
        self.in_flight = false;
        self.attempts = 0;
        self.queue.pop_front()
    }

    /// The head timed out.
    pub fn retry(&mut self) -> Retry<'_, R> {
        if !self.in_flight {
            return Retry::Idle;
        }
        if self.attempts < self.max_attempts {
            self.attempts += 1;
            match self.queue.front() {
                Some(head) => Retry::Resend(head),
                None => Retry::Idle,
            }
        } else {
            self.in_flight = false;
            self.attempts = 0;
            match self.queue.pop_front() {
                Some(head) => Retry::GaveUp(head),
                None => Retry::Idle,
            }
        }
    }

    /// Attempts made for the head so far.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Number of queued requests, including the one in flight.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight = false;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Ordering
    // =========================================================================

    #[test]
    fn fifo_one_in_flight() {
        let mut q: PendingRequestQueue<u32, 8> = PendingRequestQueue::new(3);
        for i in 0..3 {
            assert!(q.push(i));
        }
        assert_eq!(q.send_next(), Some(&0));
        assert_eq!(q.send_next(), None);
        assert_eq!(q.complete(), Some(0));
        assert_eq!(q.send_next(), Some(&1));
        assert_eq!(q.complete(), Some(1));
        assert_eq!(q.send_next(), Some(&2));
        assert_eq!(q.complete(), Some(2));
        assert_eq!(q.send_next(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn push_fails_when_full() {
        let mut q: PendingRequestQueue<u8, 2> = PendingRequestQueue::new(3);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.len(), 2);
    }

    // =========================================================================
    // Retries
    // =========================================================================

    #[test]
    fn three_attempts_then_give_up() {
        let mut q: PendingRequestQueue<&str, 4> = PendingRequestQueue::new(3);
        assert!(q.push("a"));
        assert!(q.push("b"));
        assert_eq!(q.send_next(), Some(&"a"));
        assert_eq!(q.attempts(), 1);
        assert_eq!(q.retry(), Retry::Resend(&"a"));
        assert_eq!(q.retry(), Retry::Resend(&"a"));
        assert_eq!(q.attempts(), 3);
        assert_eq!(q.retry(), Retry::GaveUp("a"));
        assert!(!q.is_in_flight());
        assert_eq!(q.send_next(), Some(&"b"));
    }

    #[test]
    fn retry_when_idle() {
        let mut q: PendingRequestQueue<u8, 4> = PendingRequestQueue::new(3);
        assert_eq!(q.retry(), Retry::Idle);
        assert!(q.push(1));
        assert_eq!(q.retry(), Retry::Idle);
    }

    #[test]
    fn clear_resets_in_flight() {
        let mut q: PendingRequestQueue<u8, 4> = PendingRequestQueue::new(3);
        assert!(q.push(1));
        q.send_next();
        q.clear();
        assert!(!q.is_in_flight());
        assert!(q.is_empty());
    }
}
