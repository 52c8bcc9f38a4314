//! The universal progress primitive.
//!
//! A `Sequence` is a 64-bit counter published with release semantics and read
//! with acquire semantics. Producers and consumers each own exactly one, and
//! every cross-thread happens-before edge in the pipeline is built from the
//! pairing of one thread's `set` with another thread's `get`.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::pipeline::INITIAL_CURSOR_VALUE;

/// Cache-line-padded atomic sequence counter.
///
/// Padding is load-bearing: two sequences sharing a cache line ping-pong the
/// line between cores on every store. `CachePadded` rounds up to 128 bytes on
/// architectures with 128-byte coherency granularity.
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Create a sequence starting at `initial_value`.
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial_value)),
        }
    }

    /// Current value, acquire ordering.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Store a new value, release ordering.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically replace `expected` with `new`. Returns true on success.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add `increment`, returning the previous value.
    #[inline]
    pub fn get_and_add(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel)
    }

    /// Minimum over `sequences`, or `default_value` when the slice is empty.
    ///
    /// Sequencers pass their own cursor as the default so an unconsumed buffer
    /// with no registered consumers reports itself as fully caught up.
    pub fn minimum(sequences: &[Arc<Sequence>], default_value: i64) -> i64 {
        sequences
            .iter()
            .map(|s| s.get())
            .min()
            .unwrap_or(default_value)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}
