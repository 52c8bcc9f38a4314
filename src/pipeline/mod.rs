//! The event pipeline core.
//!
//! Everything reachable from here is coordinated through monotonically
//! increasing 64-bit sequence numbers: producers claim them, slots are indexed
//! by them, and consumers advertise progress through them. No component
//! allocates after construction and no hot path takes a lock.

pub mod dependency;
pub mod dsl;
pub mod event_factory;
pub mod event_handler;
pub mod event_processor;
pub mod exception_handler;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod thread;
pub mod wait_strategy;

#[cfg(test)]
mod property_tests;

pub use dependency::DependentSequenceGroup;
pub use dsl::{Pipeline, PipelineChain};
pub use event_factory::{ClosureEventFactory, DefaultEventFactory, EventFactory};
pub use event_handler::{
    BatchHandler, ClosureEventHandler, EventHandler, EventTranslator, NoOpEventHandler,
};
pub use event_processor::{
    BatchEventProcessor, BatchSink, EventProcessor, EventSink, PerEventSink, ProcessorHandle,
};
pub use exception_handler::{
    ExceptionHandler, IgnoreExceptionHandler, LoggingExceptionHandler, PanicExceptionHandler,
};
pub use ring_buffer::{EventBatch, RingBuffer};
pub use sequence::Sequence;
pub use sequence_barrier::{AlertFlag, SequenceBarrier};
pub use sequencer::{MultiProducerSequencer, ProducerType, Sequencer, SingleProducerSequencer};
pub use thread::{ManagedThread, ThreadBuilder, ThreadContext};
pub use wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, TimeoutBlockingWaitStrategy,
    WaitStrategy, YieldingWaitStrategy,
};

/// Initial value of every sequence: nothing claimed, nothing consumed.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A non-blocking claim would wrap past the slowest gating sequence.
    #[error("insufficient capacity in ring buffer")]
    InsufficientCapacity,

    /// Buffer sizes must be powers of two so indexing reduces to a mask.
    #[error("buffer size must be a power of two, got {0}")]
    InvalidBufferSize(usize),

    /// A caller-supplied argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `start` was invoked on a processor that is already running.
    #[error("event processor is already running")]
    AlreadyRunning,

    /// The barrier was alerted, usually because `halt` was requested.
    #[error("sequence barrier alerted")]
    Alerted,

    /// A timeout wait strategy expired before the sequence became available.
    #[error("timed out waiting for sequence")]
    Timeout,

    /// Failure raised by user handler code; routed to the exception handler.
    #[error("event handler failure: {0}")]
    Handler(String),

    /// An event processor thread could not be spawned.
    #[error("failed to spawn processor thread")]
    ThreadSpawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
