//! Correlation ids for outbound requests.
//!
//! The wire `request_id` is a message *type* tag, so two in-flight requests of
//! the same type are indistinguishable by it.  When a deployment wants to pair
//! replies with requests, the client stamps each outbound message with a
//! separate `correlation_id` drawn from this counter.  Servers that ignore the
//! key are unaffected.
//!
//! The counter is lock-free (`AtomicU64` with relaxed ordering): ids only need
//! to be unique and increasing, they do not publish any other memory.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing source of correlation ids, starting at 1.
///
/// Zero is never handed out so it can stand for "no correlation" in logs.
///
/// # Examples
///
/// ```rust
/// use cctv_core::protocol::CorrelationCounter;
///
/// let ids = CorrelationCounter::new();
/// assert_eq!(ids.next_id(), 1);
/// assert_eq!(ids.next_id(), 2);
/// assert_eq!(ids.last_issued(), 2);
/// ```
#[derive(Debug)]
pub struct CorrelationCounter {
    next: AtomicU64,
}

impl CorrelationCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hands out the next id.  On overflow the counter skips 0 and restarts at 1.
    pub fn next_id(&self) -> u64 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// The most recently issued id, or 0 before the first call to [`next_id`](Self::next_id).
    pub fn last_issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed).wrapping_sub(1)
    }
}

impl Default for CorrelationCounter {
    fn default() -> Self {
        Self::new()
    }
}
