//! Fluent wiring of processor chains over a single ring buffer.
//!
//! The DSL is a thin client of the core: it creates barriers, registers
//! gating sequences so producers only gate on terminal consumers, and spawns
//! one managed thread per processor.

use std::sync::Arc;

use crate::pipeline::event_factory::EventFactory;
use crate::pipeline::event_handler::{BatchHandler, EventHandler};
use crate::pipeline::event_processor::{BatchEventProcessor, EventProcessor, ProcessorHandle};
use crate::pipeline::ring_buffer::RingBuffer;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequencer::ProducerType;
use crate::pipeline::thread::ThreadContext;
use crate::pipeline::wait_strategy::WaitStrategy;
use crate::pipeline::{PipelineError, Result};

/// A ring buffer plus the processors consuming from it.
pub struct Pipeline<T: Send + Sync + 'static> {
    ring: Arc<RingBuffer<T>>,
    processors: Vec<(Arc<dyn EventProcessor>, ThreadContext)>,
    handles: Vec<ProcessorHandle>,
    started: bool,
}

impl<T: Send + Sync + 'static> Pipeline<T> {
    /// Build an empty pipeline over a fresh ring buffer.
    pub fn new<F>(
        factory: F,
        buffer_size: usize,
        producer_type: ProducerType,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let ring = match producer_type {
            ProducerType::Single => {
                RingBuffer::create_single_producer(factory, buffer_size, wait_strategy)?
            }
            ProducerType::Multi => {
                RingBuffer::create_multi_producer(factory, buffer_size, wait_strategy)?
            }
        };
        Ok(Self {
            ring: Arc::new(ring),
            processors: Vec::new(),
            handles: Vec::new(),
            started: false,
        })
    }

    /// The buffer producers publish into.
    pub fn ring_buffer(&self) -> Arc<RingBuffer<T>> {
        Arc::clone(&self.ring)
    }

    /// Add a root consumer reading directly behind the producers.
    pub fn handle_events_with<H>(mut self, handler: H) -> PipelineChain<T>
    where
        H: EventHandler<T> + 'static,
    {
        let barrier = self.ring.new_barrier(&[]);
        let processor: Arc<dyn EventProcessor> = Arc::new(BatchEventProcessor::new(
            Arc::clone(&self.ring),
            barrier,
            handler,
        ));
        let tail = self.register_root(processor);
        PipelineChain {
            pipeline: self,
            tail,
        }
    }

    /// Add a root consumer that receives whole batches.
    pub fn handle_batches_with<H>(mut self, handler: H) -> PipelineChain<T>
    where
        H: BatchHandler<T> + 'static,
    {
        let barrier = self.ring.new_barrier(&[]);
        let processor: Arc<dyn EventProcessor> = Arc::new(BatchEventProcessor::with_batch_handler(
            Arc::clone(&self.ring),
            barrier,
            handler,
        ));
        let tail = self.register_root(processor);
        PipelineChain {
            pipeline: self,
            tail,
        }
    }

    fn register_root(&mut self, processor: Arc<dyn EventProcessor>) -> Vec<Arc<Sequence>> {
        let sequence = processor.sequence();
        self.ring
            .add_gating_sequences(std::slice::from_ref(&sequence));
        self.processors.push((processor, ThreadContext::new()));
        vec![sequence]
    }

    /// Start every processor on its own thread.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(PipelineError::AlreadyRunning);
        }
        for index in 0..self.processors.len() {
            let (processor, context) = &self.processors[index];
            let started = Arc::clone(processor).start(context.clone());
            match started {
                Ok(handle) => self.handles.push(handle),
                Err(error) => {
                    let _ = self.halt_and_join();
                    return Err(error);
                }
            }
        }
        self.started = true;
        Ok(())
    }

    /// Halt every processor and join its thread.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.halt_and_join()
    }

    fn halt_and_join(&mut self) -> Result<()> {
        for (processor, _) in &self.processors {
            processor.halt();
        }
        let mut first_error = None;
        for handle in self.handles.drain(..) {
            if let Err(error) = handle.join() {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Pipeline<T> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("buffer_size", &self.ring.buffer_size())
            .field("processors", &self.processors.len())
            .field("started", &self.started)
            .finish()
    }
}

/// Continuation for wiring processors that depend on earlier ones.
pub struct PipelineChain<T: Send + Sync + 'static> {
    pipeline: Pipeline<T>,
    tail: Vec<Arc<Sequence>>,
}

impl<T: Send + Sync + 'static> PipelineChain<T> {
    /// Add a consumer that runs strictly after the previous stage.
    ///
    /// The producer gate is rewired so only the new terminal consumer gates
    /// wrap-around claims.
    pub fn then<H>(mut self, handler: H) -> Self
    where
        H: EventHandler<T> + 'static,
    {
        let ring = Arc::clone(&self.pipeline.ring);
        let barrier = ring.new_barrier(&self.tail);
        let processor: Arc<dyn EventProcessor> =
            Arc::new(BatchEventProcessor::new(Arc::clone(&ring), barrier, handler));
        let sequence = processor.sequence();

        ring.add_gating_sequences(std::slice::from_ref(&sequence));
        for upstream in &self.tail {
            ring.remove_gating_sequence(upstream);
        }

        self.pipeline
            .processors
            .push((processor, ThreadContext::new()));
        self.tail = vec![sequence];
        self
    }

    /// Pin the most recently added processor to a CPU core.
    pub fn pinned_at(mut self, core_id: usize) -> Self {
        if let Some((_, context)) = self.pipeline.processors.last_mut() {
            *context = context.clone().pinned_at(core_id);
        }
        self
    }

    /// Name the most recently added processor's thread.
    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        if let Some((_, context)) = self.pipeline.processors.last_mut() {
            *context = context.clone().named(name);
        }
        self
    }

    /// Finish wiring and return the pipeline.
    pub fn build(self) -> Pipeline<T> {
        self.pipeline
    }
}
