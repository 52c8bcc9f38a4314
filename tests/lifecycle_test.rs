//! Processor lifecycle: halt under load, timeout callbacks, restartability.

use raceway::pipeline::{
    BatchEventProcessor, BlockingWaitStrategy, DefaultEventFactory, EventHandler, EventProcessor,
    PipelineError, Result, RingBuffer, ThreadContext, TimeoutBlockingWaitStrategy,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ValueEvent {
    value: i64,
}

#[derive(Default)]
struct LifecycleProbe {
    starts: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    events: Arc<AtomicUsize>,
    timeouts: Arc<AtomicUsize>,
}

impl EventHandler<ValueEvent> for LifecycleProbe {
    fn on_event(&mut self, _event: &mut ValueEvent, _sequence: i64, _end_of_batch: bool) -> Result<()> {
        self.events.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_start(&mut self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        self.timeouts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[test]
fn halt_under_publish_pressure_stops_promptly() {
    let ring = Arc::new(
        RingBuffer::create_single_producer(
            DefaultEventFactory::<ValueEvent>::new(),
            64,
            Arc::new(BlockingWaitStrategy::new()),
        )
        .unwrap(),
    );

    let probe = LifecycleProbe::default();
    let shutdowns = Arc::clone(&probe.shutdowns);

    let barrier = ring.new_barrier(&[]);
    let processor = Arc::new(BatchEventProcessor::new(Arc::clone(&ring), barrier, probe));
    ring.add_gating_sequences(&[processor.sequence()]);
    let handle = Arc::clone(&processor).start(ThreadContext::new()).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let ring = Arc::clone(&ring);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut n = 0i64;
            while !stop.load(Ordering::Acquire) {
                // Non-blocking so the producer can observe the stop flag even
                // when the consumer is gone.
                let _ = ring.try_publish_event(|event: &mut ValueEvent, _| event.value = n);
                n += 1;
            }
        })
    };

    thread::sleep(Duration::from_millis(100));
    handle.halt();

    let (tx, rx) = mpsc::channel();
    let joiner = thread::spawn(move || {
        let result = handle.join();
        let _ = tx.send(result);
    });
    let joined = rx.recv_timeout(Duration::from_secs(2));
    assert!(joined.is_ok(), "halt did not stop the processor within 2s");
    joined.unwrap().unwrap();
    joiner.join().unwrap();

    assert_eq!(shutdowns.load(Ordering::Acquire), 1);

    stop.store(true, Ordering::Release);
    producer.join().unwrap();
}

#[test]
fn timeout_strategy_fires_on_timeout_without_producers() {
    let ring = Arc::new(
        RingBuffer::create_single_producer(
            DefaultEventFactory::<ValueEvent>::new(),
            16,
            Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(1))),
        )
        .unwrap(),
    );

    let probe = LifecycleProbe::default();
    let timeouts = Arc::clone(&probe.timeouts);
    let events = Arc::clone(&probe.events);

    let barrier = ring.new_barrier(&[]);
    let processor = Arc::new(BatchEventProcessor::new(Arc::clone(&ring), barrier, probe));
    ring.add_gating_sequences(&[processor.sequence()]);
    let handle = Arc::clone(&processor).start(ThreadContext::new()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while timeouts.load(Ordering::Acquire) == 0 {
        assert!(Instant::now() < deadline, "no timeout within 2s");
        thread::yield_now();
    }
    assert_eq!(events.load(Ordering::Acquire), 0);

    handle.halt();
    handle.join().unwrap();
}

#[test]
fn start_halt_cycles_fire_lifecycle_callbacks_exactly_once_each() {
    let ring = Arc::new(
        RingBuffer::create_single_producer(
            DefaultEventFactory::<ValueEvent>::new(),
            16,
            Arc::new(BlockingWaitStrategy::new()),
        )
        .unwrap(),
    );

    let probe = LifecycleProbe::default();
    let starts = Arc::clone(&probe.starts);
    let shutdowns = Arc::clone(&probe.shutdowns);

    let barrier = ring.new_barrier(&[]);
    let processor = Arc::new(BatchEventProcessor::new(Arc::clone(&ring), barrier, probe));
    ring.add_gating_sequences(&[processor.sequence()]);

    for cycle in 1..=1000 {
        let handle = Arc::clone(&processor).start(ThreadContext::new()).unwrap();
        handle.halt();
        handle.join().unwrap();
        assert_eq!(starts.load(Ordering::Acquire), cycle);
        assert_eq!(shutdowns.load(Ordering::Acquire), cycle);
    }
}

#[test]
fn halt_before_start_leaves_the_processor_restartable() {
    let ring = Arc::new(
        RingBuffer::create_single_producer(
            DefaultEventFactory::<ValueEvent>::new(),
            16,
            Arc::new(BlockingWaitStrategy::new()),
        )
        .unwrap(),
    );

    let probe = LifecycleProbe::default();
    let starts = Arc::clone(&probe.starts);

    let barrier = ring.new_barrier(&[]);
    let processor = Arc::new(BatchEventProcessor::new(Arc::clone(&ring), barrier, probe));
    ring.add_gating_sequences(&[processor.sequence()]);

    processor.halt();
    assert!(!processor.is_running());

    let handle = Arc::clone(&processor).start(ThreadContext::new()).unwrap();
    assert!(matches!(
        Arc::clone(&processor).start(ThreadContext::new()),
        Err(PipelineError::AlreadyRunning)
    ));
    handle.halt();
    handle.join().unwrap();
    assert_eq!(starts.load(Ordering::Acquire), 1);
}
