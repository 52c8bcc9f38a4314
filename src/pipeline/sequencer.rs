//! Claim and publish protocols for producers.
//!
//! The single-producer variant keeps its claim state in plain cells and only
//! touches an atomic on publish. The multi-producer variant claims through a
//! CAS loop on the cursor and tracks per-slot availability so consumers can
//! tolerate out-of-order publishes.

use parking_lot::RwLock;
use std::cell::Cell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::pipeline::sequence::Sequence;
use crate::pipeline::wait_strategy::WaitStrategy;
use crate::pipeline::{PipelineError, Result, INITIAL_CURSOR_VALUE};

/// Which claim protocol a ring buffer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    /// One publishing thread; no CAS on the claim path.
    Single,
    /// Any number of publishing threads; FIFO claim order via CAS.
    Multi,
}

/// Assigns sequence numbers to producers and tracks what is safely published.
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// The cursor: highest claimed (single) or highest claimed via CAS (multi).
    fn cursor(&self) -> Arc<Sequence>;

    fn buffer_size(&self) -> usize;

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy>;

    /// Claim the next sequence, blocking while the buffer is wrapped.
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claim `n` contiguous sequences, returning the highest. Blocks while
    /// claiming would overwrite unconsumed slots.
    fn next_n(&self, n: i64) -> Result<i64>;

    /// Non-blocking claim of the next sequence.
    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    /// Non-blocking claim of `n` sequences; `Err(InsufficientCapacity)` when
    /// the claim would wrap past the slowest gating sequence.
    fn try_next_n(&self, n: i64) -> Result<i64>;

    /// Mark `sequence` consumable and wake blocked consumers.
    fn publish(&self, sequence: i64);

    /// Mark the inclusive range consumable.
    fn publish_range(&self, low: i64, high: i64);

    /// True once `sequence` has been published.
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `[lower_bound, available]` such that every slot up
    /// to it is published. Returns `lower_bound - 1` when the first slot is
    /// still pending.
    fn highest_published_sequence(&self, lower_bound: i64, available: i64) -> i64;

    /// Register downstream sequences the producer must not overtake.
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Deregister a gating sequence. Returns false if it was not registered.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum over the gating sequences, defaulting to the cursor.
    fn minimum_gating_sequence(&self) -> i64;

    /// Free slots left before a claim would block.
    fn remaining_capacity(&self) -> i64;
}

fn check_claim_size(n: i64, buffer_size: usize) -> Result<()> {
    if n < 1 {
        return Err(PipelineError::InvalidArgument("claim size must be >= 1"));
    }
    if n > buffer_size as i64 {
        return Err(PipelineError::InvalidArgument(
            "claim size exceeds buffer size",
        ));
    }
    Ok(())
}

/// Sequencer for exactly one publishing thread.
///
/// Claim state lives in `Cell`s: the claim side is single-threaded by
/// contract, so `next` never pays for an atomic. Only `publish` does, moving
/// the cursor with a release store that makes the slot writes visible.
#[derive(Debug)]
pub struct SingleProducerSequencer {
    buffer_size: usize,
    cursor: Arc<Sequence>,
    /// Highest sequence claimed so far; owned by the producer thread.
    next_value: Cell<i64>,
    /// Last observed minimum gating sequence; stale values only cause an
    /// extra re-read, never an unsafe claim.
    cached_gate: Cell<i64>,
    gating_sequences: RwLock<Vec<Arc<Sequence>>>,
    wait_strategy: Arc<dyn WaitStrategy>,
}

// SAFETY: the Cell fields are only touched by next/try_next/publish, which the
// single-producer contract restricts to one thread. Every other field is
// inherently thread-safe.
unsafe impl Sync for SingleProducerSequencer {}

impl SingleProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        Self {
            buffer_size,
            cursor: Arc::new(Sequence::default()),
            next_value: Cell::new(INITIAL_CURSOR_VALUE),
            cached_gate: Cell::new(INITIAL_CURSOR_VALUE),
            gating_sequences: RwLock::new(Vec::new()),
            wait_strategy,
        }
    }

    fn minimum_gating(&self, default_value: i64) -> i64 {
        Sequence::minimum(&self.gating_sequences.read(), default_value)
    }
}

impl Sequencer for SingleProducerSequencer {
    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        Arc::clone(&self.wait_strategy)
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        check_claim_size(n, self.buffer_size)?;

        let next_value = self.next_value.get();
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.buffer_size as i64;
        let cached = self.cached_gate.get();

        if wrap_point > cached || cached > next_value {
            let mut min_sequence = self.minimum_gating(next_value);
            while wrap_point > min_sequence {
                self.wait_strategy.park_producer();
                min_sequence = self.minimum_gating(next_value);
            }
            self.cached_gate.set(min_sequence);
        }

        self.next_value.set(next_sequence);
        Ok(next_sequence)
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        check_claim_size(n, self.buffer_size)?;

        let next_sequence = self.next_value.get() + n;
        let wrap_point = next_sequence - self.buffer_size as i64;

        if wrap_point > self.cached_gate.get() {
            let min_sequence = self.minimum_gating(self.next_value.get());
            self.cached_gate.set(min_sequence);
            if wrap_point > min_sequence {
                return Err(PipelineError::InsufficientCapacity);
            }
        }

        self.next_value.set(next_sequence);
        Ok(next_sequence)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.cursor.get()
    }

    fn highest_published_sequence(&self, _lower_bound: i64, available: i64) -> i64 {
        // A single producer publishes in claim order; the cursor is already
        // the contiguous high-water mark.
        available
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating_sequences.write().extend_from_slice(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        let mut gating = self.gating_sequences.write();
        match gating.iter().position(|s| Arc::ptr_eq(s, sequence)) {
            Some(index) => {
                gating.remove(index);
                true
            }
            None => false,
        }
    }

    fn minimum_gating_sequence(&self) -> i64 {
        self.minimum_gating(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let consumed = self.minimum_gating(self.next_value.get());
        let produced = self.next_value.get();
        self.buffer_size as i64 - (produced - consumed)
    }
}

/// Sequencer for any number of publishing threads.
///
/// The cursor tracks the highest *claimed* sequence; availability is a
/// per-slot property recorded in `available_buffer`, where each entry holds
/// the wrap count at which its slot was last published. A slot at index `i`
/// is published for sequence `s` iff `available_buffer[i] == s >> index_shift`,
/// which also defuses ABA across wraps.
#[derive(Debug)]
pub struct MultiProducerSequencer {
    buffer_size: usize,
    index_mask: i64,
    index_shift: u32,
    cursor: Arc<Sequence>,
    gating_sequences: RwLock<Vec<Arc<Sequence>>>,
    /// Padded cache of the last observed minimum gating sequence; shared by
    /// all producers to short-circuit the wrap check.
    gating_sequence_cache: Sequence,
    available_buffer: Box<[AtomicI32]>,
    wait_strategy: Arc<dyn WaitStrategy>,
}

impl MultiProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if buffer_size == 0 || !buffer_size.is_power_of_two() {
            return Err(PipelineError::InvalidBufferSize(buffer_size));
        }
        let available_buffer: Box<[AtomicI32]> =
            (0..buffer_size).map(|_| AtomicI32::new(-1)).collect();
        Ok(Self {
            buffer_size,
            index_mask: (buffer_size - 1) as i64,
            index_shift: buffer_size.trailing_zeros(),
            cursor: Arc::new(Sequence::default()),
            gating_sequences: RwLock::new(Vec::new()),
            gating_sequence_cache: Sequence::default(),
            available_buffer,
            wait_strategy,
        })
    }

    #[inline]
    fn slot_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    #[inline]
    fn availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    /// Release-publish a single slot. Each store is individually release
    /// ordered, so range publishes need no trailing fence: a consumer's
    /// acquire load of any entry observes that slot's writes.
    fn set_available(&self, sequence: i64) {
        self.available_buffer[self.slot_index(sequence)]
            .store(self.availability_flag(sequence), Ordering::Release);
    }

    fn minimum_gating(&self, default_value: i64) -> i64 {
        Sequence::minimum(&self.gating_sequences.read(), default_value)
    }

    fn has_capacity(&self, required: i64, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required) - self.buffer_size as i64;
        let cached = self.gating_sequence_cache.get();
        if wrap_point > cached || cached > cursor_value {
            let min_sequence = self.minimum_gating(cursor_value);
            self.gating_sequence_cache.set(min_sequence);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }
}

impl Sequencer for MultiProducerSequencer {
    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        Arc::clone(&self.wait_strategy)
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        check_claim_size(n, self.buffer_size)?;
        loop {
            let current = self.cursor.get();
            let next_sequence = current + n;
            let wrap_point = next_sequence - self.buffer_size as i64;
            let cached = self.gating_sequence_cache.get();

            if wrap_point > cached || cached > current {
                let min_sequence = self.minimum_gating(current);
                if wrap_point > min_sequence {
                    self.wait_strategy.park_producer();
                    continue;
                }
                self.gating_sequence_cache.set(min_sequence);
            } else if self.cursor.compare_and_set(current, next_sequence) {
                return Ok(next_sequence);
            }
        }
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        check_claim_size(n, self.buffer_size)?;
        loop {
            let current = self.cursor.get();
            let next_sequence = current + n;
            if !self.has_capacity(n, current) {
                return Err(PipelineError::InsufficientCapacity);
            }
            if self.cursor.compare_and_set(current, next_sequence) {
                return Ok(next_sequence);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            self.set_available(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        self.available_buffer[self.slot_index(sequence)].load(Ordering::Acquire)
            == self.availability_flag(sequence)
    }

    fn highest_published_sequence(&self, lower_bound: i64, available: i64) -> i64 {
        let mut sequence = lower_bound;
        while sequence <= available {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating_sequences.write().extend_from_slice(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        let mut gating = self.gating_sequences.write();
        match gating.iter().position(|s| Arc::ptr_eq(s, sequence)) {
            Some(index) => {
                gating.remove(index);
                true
            }
            None => false,
        }
    }

    fn minimum_gating_sequence(&self) -> i64 {
        self.minimum_gating(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.minimum_gating(produced);
        self.buffer_size as i64 - (produced - consumed)
    }
}
