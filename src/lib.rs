//! `raceway` - a lock-free in-process event pipeline.
//!
//! Events live in a preallocated ring buffer of fixed slots. Producers claim
//! monotonically increasing sequence numbers from a sequencer, mutate the
//! claimed slots in place, and publish. Consumers run as event processors on
//! dedicated threads, each gated by a sequence barrier that combines the
//! producer cursor with the sequences of any upstream processors. Wait
//! strategies decide how a consumer burns (or saves) CPU while it waits.
//!
//! ## Quick start
//!
//! ```rust
//! use raceway::pipeline::{
//!     BusySpinWaitStrategy, ClosureEventHandler, DefaultEventFactory, Pipeline, ProducerType,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default)]
//! struct Tick {
//!     value: i64,
//! }
//!
//! let factory = DefaultEventFactory::<Tick>::new();
//! let mut pipeline = Pipeline::new(
//!     factory,
//!     64,
//!     ProducerType::Single,
//!     Arc::new(BusySpinWaitStrategy::new()),
//! )
//! .unwrap()
//! .handle_events_with(ClosureEventHandler::new(|tick: &mut Tick, sequence, _| {
//!     tick.value = sequence;
//! }))
//! .build();
//!
//! pipeline.start().unwrap();
//!
//! let ring = pipeline.ring_buffer();
//! for n in 0..32 {
//!     ring.publish_event(|tick: &mut Tick, _| tick.value = n).unwrap();
//! }
//!
//! pipeline.shutdown().unwrap();
//! ```
//!
//! ## Architecture
//!
//! - [`pipeline::Sequence`]: cache-line-padded atomic progress counter
//! - [`pipeline::RingBuffer`]: preallocated slot storage plus claim/publish surface
//! - [`pipeline::Sequencer`]: single- and multi-producer claim protocols
//! - [`pipeline::SequenceBarrier`]: consumer-side gate with alert support
//! - [`pipeline::WaitStrategy`]: busy-spin, yielding, sleeping, blocking, timeout
//! - [`pipeline::BatchEventProcessor`]: the consumer run loop
//! - [`pipeline::Pipeline`]: fluent wiring of processor chains

pub mod pipeline;

pub use pipeline::{
    BatchEventProcessor, BatchHandler, BlockingWaitStrategy, BusySpinWaitStrategy,
    ClosureEventHandler, DefaultEventFactory, EventBatch, EventFactory, EventHandler,
    EventProcessor, ExceptionHandler, Pipeline, PipelineError, ProcessorHandle, ProducerType,
    Result, RingBuffer, Sequence, SequenceBarrier, Sequencer, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy, INITIAL_CURSOR_VALUE,
};

/// Crate version as compiled into the binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
