//! The consumer run loop.
//!
//! A processor claims batches from its barrier, dispatches them to the user
//! handler, and publishes its own sequence with release ordering so any
//! downstream consumer that observes the sequence also observes this
//! consumer's slot mutations.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::pipeline::event_handler::{BatchHandler, EventHandler};
use crate::pipeline::exception_handler::{ExceptionHandler, LoggingExceptionHandler};
use crate::pipeline::ring_buffer::{EventBatch, RingBuffer};
use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequence_barrier::SequenceBarrier;
use crate::pipeline::thread::{ThreadBuilder, ThreadContext};
use crate::pipeline::{PipelineError, Result};

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// A consumer with its own sequence and lifecycle.
///
/// Lifecycle states are Idle, Running, and Halted, transitioning strictly
/// Idle → Running → Halted → Idle; a processor is restartable once its
/// thread has exited.
pub trait EventProcessor: Send + Sync {
    /// This processor's progress sequence; downstream consumers and the
    /// producer gate read it.
    fn sequence(&self) -> Arc<Sequence>;

    /// Request the run loop to stop. Idempotent, safe in any state, and a
    /// no-op on a processor that was never started. Returns immediately; the
    /// caller joins through the handle returned by `start`.
    fn halt(&self);

    fn is_running(&self) -> bool;

    /// Run the loop on the calling thread until halted. Fails with
    /// `AlreadyRunning` if the processor is not idle.
    fn run(&self) -> Result<()>;

    /// Launch the run loop on its own long-running thread.
    fn start(self: Arc<Self>, context: ThreadContext) -> Result<ProcessorHandle>;
}

/// Join handle for a started processor.
pub struct ProcessorHandle {
    thread: crate::pipeline::thread::ManagedThread,
    processor: Arc<dyn EventProcessor>,
}

impl ProcessorHandle {
    pub fn halt(&self) {
        self.processor.halt();
    }

    pub fn is_running(&self) -> bool {
        self.processor.is_running()
    }

    pub fn sequence(&self) -> Arc<Sequence> {
        self.processor.sequence()
    }

    /// Wait for the processor thread to exit.
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| PipelineError::Handler("event processor thread panicked".into()))
    }
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Closed dispatch seam between the run loop and the two handler shapes.
///
/// Monomorphised per handler type: the loop that executes billions of times
/// pays no dynamic dispatch for event delivery.
pub trait EventSink<T>: Send {
    fn on_start(&mut self) -> Result<()>;
    fn on_shutdown(&mut self) -> Result<()>;
    fn on_timeout(&mut self, sequence: i64) -> Result<()>;
    fn set_sequence_callback(&mut self, sequence: Arc<Sequence>);

    /// Deliver the inclusive range `[start, end]`, routing handler failures
    /// to `exceptions`. Never propagates: the processor advances past the
    /// range regardless.
    fn process(
        &mut self,
        ring: &RingBuffer<T>,
        start: i64,
        end: i64,
        exceptions: &dyn ExceptionHandler<T>,
    );
}

/// Per-event delivery with an `end_of_batch` marker on the final slot.
pub struct PerEventSink<H> {
    handler: H,
}

impl<T, H> EventSink<T> for PerEventSink<H>
where
    T: Send + Sync,
    H: EventHandler<T>,
{
    fn on_start(&mut self) -> Result<()> {
        self.handler.on_start()
    }

    fn on_shutdown(&mut self) -> Result<()> {
        self.handler.on_shutdown()
    }

    fn on_timeout(&mut self, sequence: i64) -> Result<()> {
        self.handler.on_timeout(sequence)
    }

    fn set_sequence_callback(&mut self, sequence: Arc<Sequence>) {
        self.handler.set_sequence_callback(sequence);
    }

    fn process(
        &mut self,
        ring: &RingBuffer<T>,
        start: i64,
        end: i64,
        exceptions: &dyn ExceptionHandler<T>,
    ) {
        for sequence in start..=end {
            // SAFETY: the processor owns every sequence in [start, end].
            let event = unsafe { ring.get_mut(sequence) };
            if let Err(error) = self.handler.on_event(&mut *event, sequence, sequence == end) {
                exceptions.handle_event_exception(error, sequence, &*event);
            }
        }
    }
}

/// Whole-batch delivery through an [`EventBatch`] view.
pub struct BatchSink<H> {
    handler: H,
}

impl<T, H> EventSink<T> for BatchSink<H>
where
    T: Send + Sync,
    H: BatchHandler<T>,
{
    fn on_start(&mut self) -> Result<()> {
        self.handler.on_start()
    }

    fn on_shutdown(&mut self) -> Result<()> {
        self.handler.on_shutdown()
    }

    fn on_timeout(&mut self, sequence: i64) -> Result<()> {
        self.handler.on_timeout(sequence)
    }

    fn set_sequence_callback(&mut self, sequence: Arc<Sequence>) {
        self.handler.set_sequence_callback(sequence);
    }

    fn process(
        &mut self,
        ring: &RingBuffer<T>,
        start: i64,
        end: i64,
        exceptions: &dyn ExceptionHandler<T>,
    ) {
        let batch = EventBatch::new(ring, start, end);
        if let Err(error) = self.handler.on_batch(batch, start) {
            exceptions.handle_batch_exception(error, start, end);
        }
    }
}

/// The standard processor: waits on a barrier, dispatches batches, publishes
/// progress.
pub struct BatchEventProcessor<T, S> {
    sequence: Arc<Sequence>,
    barrier: SequenceBarrier,
    ring: Arc<RingBuffer<T>>,
    sink: Mutex<S>,
    exception_handler: Box<dyn ExceptionHandler<T>>,
    state: AtomicU8,
}

impl<T, H> BatchEventProcessor<T, PerEventSink<H>>
where
    T: Send + Sync + 'static,
    H: EventHandler<T>,
{
    /// Processor delivering events one at a time with `end_of_batch` marking.
    pub fn new(ring: Arc<RingBuffer<T>>, barrier: SequenceBarrier, handler: H) -> Self {
        Self::with_sink(ring, barrier, PerEventSink { handler })
    }
}

impl<T, H> BatchEventProcessor<T, BatchSink<H>>
where
    T: Send + Sync + 'static,
    H: BatchHandler<T>,
{
    /// Processor delivering whole batches through an [`EventBatch`] view.
    pub fn with_batch_handler(
        ring: Arc<RingBuffer<T>>,
        barrier: SequenceBarrier,
        handler: H,
    ) -> Self {
        Self::with_sink(ring, barrier, BatchSink { handler })
    }
}

impl<T, S> BatchEventProcessor<T, S>
where
    T: Send + Sync + 'static,
    S: EventSink<T>,
{
    fn with_sink(ring: Arc<RingBuffer<T>>, barrier: SequenceBarrier, sink: S) -> Self {
        Self {
            sequence: Arc::new(Sequence::default()),
            barrier,
            ring,
            sink: Mutex::new(sink),
            exception_handler: Box::new(LoggingExceptionHandler::new()),
            state: AtomicU8::new(IDLE),
        }
    }

    /// Replace the default logging exception handler. Must be called before
    /// the processor starts.
    pub fn with_exception_handler(mut self, handler: Box<dyn ExceptionHandler<T>>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn barrier(&self) -> &SequenceBarrier {
        &self.barrier
    }

    fn claim_running(&self) -> Result<()> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::AlreadyRunning)?;
        Ok(())
    }

    /// The loop proper. The caller has already moved the state to Running.
    fn run_claimed(&self) {
        self.barrier.clear_alert();
        let mut sink = self.sink.lock();
        sink.set_sequence_callback(Arc::clone(&self.sequence));

        tracing::debug!("event processor starting");
        if let Err(error) = sink.on_start() {
            self.exception_handler.handle_start_exception(error);
        }

        let mut next_sequence = self.sequence.get() + 1;
        while self.state.load(Ordering::Acquire) == RUNNING {
            match self.barrier.wait_for(next_sequence) {
                Ok(available) if available >= next_sequence => {
                    sink.process(
                        &self.ring,
                        next_sequence,
                        available,
                        self.exception_handler.as_ref(),
                    );
                    // Release store: downstream consumers observing this
                    // value also observe our slot mutations.
                    self.sequence.set(available);
                    next_sequence = available + 1;
                }
                Ok(_) => {
                    // Spurious wakeup below the requested sequence; re-poll.
                }
                Err(PipelineError::Timeout) => {
                    if let Err(error) = sink.on_timeout(next_sequence - 1) {
                        self.exception_handler
                            .handle_timeout_exception(error, next_sequence - 1);
                    }
                }
                Err(_) => {
                    // Alerted: the while condition decides whether this is a
                    // halt or a transient alert.
                }
            }
        }

        if let Err(error) = sink.on_shutdown() {
            self.exception_handler.handle_shutdown_exception(error);
        }
        tracing::debug!("event processor stopped");
        drop(sink);
        self.state.store(IDLE, Ordering::Release);
    }
}

impl<T, S> EventProcessor for BatchEventProcessor<T, S>
where
    T: Send + Sync + 'static,
    S: EventSink<T> + 'static,
{
    fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    fn halt(&self) {
        if self
            .state
            .compare_exchange(RUNNING, HALTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.barrier.alert();
        }
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn run(&self) -> Result<()> {
        self.claim_running()?;
        self.run_claimed();
        Ok(())
    }

    fn start(self: Arc<Self>, context: ThreadContext) -> Result<ProcessorHandle> {
        // Claim before spawning so a halt issued immediately after `start`
        // returns can never race the thread into an unhaltable wait.
        self.claim_running()?;
        let runner = Arc::clone(&self);
        let thread = ThreadBuilder::from_context(context).spawn(move || runner.run_claimed())?;
        Ok(ProcessorHandle {
            thread,
            processor: self,
        })
    }
}
