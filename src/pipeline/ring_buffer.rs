//! Preallocated slot storage plus the producer-facing claim/publish surface.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::pipeline::event_factory::EventFactory;
use crate::pipeline::event_handler::EventTranslator;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequence_barrier::SequenceBarrier;
use crate::pipeline::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::pipeline::wait_strategy::WaitStrategy;
use crate::pipeline::{PipelineError, Result};

/// Fixed power-of-two array of preallocated event slots.
///
/// Slots are created once by the injected factory and never replaced;
/// producers mutate them in place before publishing. Access discipline is
/// sequence-partitioned: a producer owns a slot from claim to publish, the
/// consuming processor owns it from availability until its own sequence
/// passes it. The buffer itself never allocates or copies after construction.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    index_mask: i64,
    sequencer: Arc<dyn Sequencer>,
}

// SAFETY: slot access is coordinated entirely through sequence ordering; the
// claim/publish and barrier protocols guarantee a slot is never aliased
// mutably across threads.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Send + Sync> RingBuffer<T> {
    /// Ring buffer fed by exactly one publishing thread.
    pub fn create_single_producer<F>(
        factory: F,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let sequencer = Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy));
        Self::with_sequencer(factory, buffer_size, sequencer)
    }

    /// Ring buffer safe for concurrent publishing threads.
    pub fn create_multi_producer<F>(
        factory: F,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let sequencer = Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy)?);
        Self::with_sequencer(factory, buffer_size, sequencer)
    }

    fn with_sequencer<F>(
        factory: F,
        buffer_size: usize,
        sequencer: Arc<dyn Sequencer>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        if buffer_size == 0 || !buffer_size.is_power_of_two() {
            return Err(PipelineError::InvalidBufferSize(buffer_size));
        }
        let slots: Box<[UnsafeCell<T>]> = (0..buffer_size)
            .map(|_| UnsafeCell::new(factory.new_instance()))
            .collect();
        Ok(Self {
            slots,
            index_mask: (buffer_size - 1) as i64,
            sequencer,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }

    pub fn cursor(&self) -> Arc<Sequence> {
        self.sequencer.cursor()
    }

    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }

    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    /// Claim the next sequence, blocking while the buffer is wrapped.
    pub fn next(&self) -> Result<i64> {
        self.sequencer.next()
    }

    /// Claim `n` contiguous sequences, returning the highest.
    pub fn next_n(&self, n: i64) -> Result<i64> {
        self.sequencer.next_n(n)
    }

    /// Non-blocking claim; `Err(InsufficientCapacity)` when wrapping would
    /// overtake a gating sequence.
    pub fn try_next(&self) -> Result<i64> {
        self.sequencer.try_next()
    }

    pub fn try_next_n(&self, n: i64) -> Result<i64> {
        self.sequencer.try_next_n(n)
    }

    pub fn publish(&self, sequence: i64) {
        self.sequencer.publish(sequence);
    }

    pub fn publish_range(&self, low: i64, high: i64) {
        self.sequencer.publish_range(low, high);
    }

    pub fn is_available(&self, sequence: i64) -> bool {
        self.sequencer.is_available(sequence)
    }

    #[inline]
    pub(crate) fn slot_ptr(&self, sequence: i64) -> *mut T {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: the mask keeps the index in bounds.
        unsafe { self.slots.get_unchecked(index) }.get()
    }

    /// Shared reference to the slot for `sequence`.
    ///
    /// Valid once the sequence is published and the caller's barrier has
    /// returned it; the sequence partition guarantees no concurrent writer.
    pub fn get(&self, sequence: i64) -> &T {
        // SAFETY: see above; readers only follow the barrier.
        unsafe { &*self.slot_ptr(sequence) }
    }

    /// Exclusive reference to the slot for `sequence`.
    ///
    /// # Safety
    /// The caller must hold the claim on `sequence` (producer side, between
    /// `next` and `publish`) or be the processor that owns it (consumer side).
    pub unsafe fn get_mut(&self, sequence: i64) -> &mut T {
        &mut *self.slot_ptr(sequence)
    }

    /// Claim, translate, publish: the complete producer idiom in one call.
    pub fn publish_event<E>(&self, mut translator: E) -> Result<()>
    where
        E: EventTranslator<T>,
    {
        let sequence = self.sequencer.next()?;
        // SAFETY: the claim gives us exclusive ownership until publish.
        let event = unsafe { self.get_mut(sequence) };
        translator.translate_to(event, sequence);
        self.sequencer.publish(sequence);
        Ok(())
    }

    /// As `publish_event` but failing fast when the buffer is full.
    pub fn try_publish_event<E>(&self, mut translator: E) -> Result<()>
    where
        E: EventTranslator<T>,
    {
        let sequence = self.sequencer.try_next()?;
        // SAFETY: the claim gives us exclusive ownership until publish.
        let event = unsafe { self.get_mut(sequence) };
        translator.translate_to(event, sequence);
        self.sequencer.publish(sequence);
        Ok(())
    }

    /// Register downstream consumer sequences the producer must not overtake.
    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.sequencer.add_gating_sequences(sequences);
    }

    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequencer.remove_gating_sequence(sequence)
    }

    /// Barrier for a consumer that trails `dependent_sequences` (the producer
    /// cursor alone when empty).
    pub fn new_barrier(&self, dependent_sequences: &[Arc<Sequence>]) -> SequenceBarrier {
        SequenceBarrier::new(
            Arc::clone(&self.sequencer),
            self.sequencer.wait_strategy(),
            dependent_sequences.to_vec(),
        )
    }
}

/// A contiguous run of available slots handed to a batch handler.
///
/// The owning processor holds every sequence in `[start, end]`, so mutation
/// through the view is race-free. Iteration yields each slot exactly once in
/// ascending sequence order.
pub struct EventBatch<'a, T> {
    ring: &'a RingBuffer<T>,
    next: i64,
    start: i64,
    end: i64,
}

impl<'a, T: Send + Sync> EventBatch<'a, T> {
    pub(crate) fn new(ring: &'a RingBuffer<T>, start: i64, end: i64) -> Self {
        Self {
            ring,
            next: start,
            start,
            end,
        }
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn start_sequence(&self) -> i64 {
        self.start
    }

    pub fn end_sequence(&self) -> i64 {
        self.end
    }

    /// Indexed access relative to the start of the batch.
    ///
    /// Must not be mixed with holding references produced by iteration; the
    /// view owns the slots but hands out one exclusive borrow at a time.
    pub fn get_mut(&mut self, offset: usize) -> &mut T {
        assert!(offset < self.len(), "batch offset out of range");
        // SAFETY: the processor owns [start, end]; offset is bounds-checked.
        unsafe { &mut *self.ring.slot_ptr(self.start + offset as i64) }
    }
}

impl<'a, T: Send + Sync> Iterator for EventBatch<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        // SAFETY: the processor owns [start, end] and each sequence is
        // yielded exactly once.
        let event = unsafe { &mut *self.ring.slot_ptr(self.next) };
        self.next += 1;
        Some(event)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next + 1).max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl<'a, T: Send + Sync> ExactSizeIterator for EventBatch<'a, T> {}
