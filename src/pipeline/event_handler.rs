//! User-facing contracts: per-event handlers, batch handlers, translators.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::pipeline::ring_buffer::EventBatch;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::Result;

/// Per-event consumer callback.
///
/// `end_of_batch` is true exactly when this is the last event the processor
/// will deliver before re-polling its barrier, which is the natural point to
/// flush any work the handler has been accumulating.
pub trait EventHandler<T>: Send {
    fn on_event(&mut self, event: &mut T, sequence: i64, end_of_batch: bool) -> Result<()>;

    /// Invoked once when the processor's run loop starts.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Invoked once when the processor's run loop exits.
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Invoked when a timeout wait strategy expires with no events pending.
    /// `sequence` is the last sequence this processor has consumed.
    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }

    /// Receives the processor's own sequence so a handler can advertise
    /// progress mid-batch. The default ignores it.
    fn set_sequence_callback(&mut self, _sequence: Arc<Sequence>) {}
}

/// Batch consumer callback: one invocation per contiguous run of available
/// events. Mutating slots through the view is race-free; the processor owns
/// every sequence in the batch.
pub trait BatchHandler<T>: Send {
    fn on_batch(&mut self, batch: EventBatch<'_, T>, start_sequence: i64) -> Result<()>;

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }

    fn set_sequence_callback(&mut self, _sequence: Arc<Sequence>) {}
}

/// Handler backed by a closure; enough for most leaf consumers.
pub struct ClosureEventHandler<T, F> {
    on_event: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> ClosureEventHandler<T, F>
where
    F: FnMut(&mut T, i64, bool) + Send,
{
    pub fn new(on_event: F) -> Self {
        Self {
            on_event,
            _marker: PhantomData,
        }
    }
}

impl<T, F> EventHandler<T> for ClosureEventHandler<T, F>
where
    T: Send,
    F: FnMut(&mut T, i64, bool) + Send,
{
    fn on_event(&mut self, event: &mut T, sequence: i64, end_of_batch: bool) -> Result<()> {
        (self.on_event)(event, sequence, end_of_batch);
        Ok(())
    }
}

/// Handler that discards every event. Useful as a chain terminator in tests.
#[derive(Debug, Default)]
pub struct NoOpEventHandler<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> NoOpEventHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Send> EventHandler<T> for NoOpEventHandler<T> {
    fn on_event(&mut self, _event: &mut T, _sequence: i64, _end_of_batch: bool) -> Result<()> {
        Ok(())
    }
}

/// Writes payload data into a claimed slot before it is published.
///
/// Any `FnMut(&mut T, i64)` closure is a translator, so call sites read
/// `ring.publish_event(|event, seq| ...)`.
pub trait EventTranslator<T> {
    fn translate_to(&mut self, event: &mut T, sequence: i64);
}

impl<T, F> EventTranslator<T> for F
where
    F: FnMut(&mut T, i64),
{
    fn translate_to(&mut self, event: &mut T, sequence: i64) {
        self(event, sequence)
    }
}
