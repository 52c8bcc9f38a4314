//! Policies for how a consumer waits until a sequence becomes available.
//!
//! Every strategy checks the barrier's alert flag on each iteration and
//! re-reads the dependent sequences after waking, so spurious wakeups are
//! harmless and `halt` unblocks a waiting consumer within one signaling
//! latency.

use parking_lot::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::pipeline::dependency::DependentSequenceGroup;
use crate::pipeline::sequence_barrier::AlertFlag;
use crate::pipeline::{PipelineError, Result};

/// How a consumer blocks or spins until `sequence` is reachable.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until the dependent view reaches at least `sequence`.
    ///
    /// Returns the available sequence (≥ `sequence`), `Err(Alerted)` when the
    /// barrier was alerted, or `Err(Timeout)` for deadline-based strategies.
    fn wait_for(
        &self,
        sequence: i64,
        dependents: &DependentSequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64>;

    /// Wake any thread parked in `wait_for`. No-op for non-blocking strategies.
    fn signal_all_when_blocking(&self) {}

    /// Park hook for a producer whose claim is gated on slow consumers.
    fn park_producer(&self) {
        thread::yield_now();
    }
}

/// Tight loop on the dependent view. Lowest latency, one full core per waiter.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        dependents: &DependentSequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        dependents.spin_until(sequence, alert)
    }

    fn park_producer(&self) {
        std::hint::spin_loop();
    }
}

/// Spin a bounded number of iterations, then yield the thread.
#[derive(Debug, Default)]
pub struct YieldingWaitStrategy;

const SPIN_TRIES: u32 = 100;

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        dependents: &DependentSequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut counter = SPIN_TRIES;
        loop {
            alert.check()?;
            let available = dependents.value();
            if available >= sequence {
                return Ok(available);
            }
            if counter > 0 {
                counter -= 1;
                std::hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
    }
}

/// Spin, then yield, then sleep with exponential backoff up to a cap.
///
/// The cheapest strategy to idle on: a stalled consumer settles at one wakeup
/// per `max_sleep` interval.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    spin_tries: u32,
    yield_tries: u32,
    initial_sleep: Duration,
    max_sleep: Duration,
}

impl SleepingWaitStrategy {
    pub fn new() -> Self {
        Self::with_max_sleep(Duration::from_millis(1))
    }

    /// Cap the backed-off sleep interval at `max_sleep`.
    pub fn with_max_sleep(max_sleep: Duration) -> Self {
        Self {
            spin_tries: 100,
            yield_tries: 100,
            initial_sleep: Duration::from_micros(1),
            max_sleep,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        dependents: &DependentSequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        let mut remaining_spins = self.spin_tries;
        let mut remaining_yields = self.yield_tries;
        let mut sleep = self.initial_sleep;
        loop {
            alert.check()?;
            let available = dependents.value();
            if available >= sequence {
                return Ok(available);
            }
            if remaining_spins > 0 {
                remaining_spins -= 1;
                std::hint::spin_loop();
            } else if remaining_yields > 0 {
                remaining_yields -= 1;
                thread::yield_now();
            } else {
                thread::sleep(sleep);
                sleep = (sleep * 2).min(self.max_sleep);
            }
        }
    }
}

/// Park on a condition variable until the producer cursor advances.
///
/// Best CPU economy under bursty load; producers pay a `notify_all` on every
/// publish. The park is bounded so a signal racing the park can never strand
/// the waiter.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

const PARK_INTERVAL: Duration = Duration::from_millis(1);

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        dependents: &DependentSequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if dependents.cursor_value() < sequence {
            let mut guard = self.mutex.lock();
            loop {
                alert.check()?;
                if dependents.cursor_value() >= sequence {
                    break;
                }
                let _ = self.condvar.wait_for(&mut guard, PARK_INTERVAL);
            }
        }
        // The cursor is far enough; now trail any upstream processors.
        dependents.yield_until(sequence, alert)
    }

    fn signal_all_when_blocking(&self) {
        self.condvar.notify_all();
    }
}

/// Blocking wait with a deadline; expiry surfaces as `Err(Timeout)`.
///
/// Consumers translate the timeout into an `on_timeout` callback rather than
/// treating it as a failure.
#[derive(Debug)]
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        dependents: &DependentSequenceGroup,
        alert: &AlertFlag,
    ) -> Result<i64> {
        if dependents.cursor_value() < sequence {
            let deadline = Instant::now() + self.timeout;
            let mut guard = self.mutex.lock();
            loop {
                alert.check()?;
                if dependents.cursor_value() >= sequence {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(PipelineError::Timeout);
                }
                let _ = self
                    .condvar
                    .wait_for(&mut guard, (deadline - now).min(PARK_INTERVAL));
            }
        }
        dependents.yield_until(sequence, alert)
    }

    fn signal_all_when_blocking(&self) {
        self.condvar.notify_all();
    }
}
