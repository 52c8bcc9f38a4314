//! The gate a consumer consults before reading slots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::pipeline::dependency::DependentSequenceGroup;
use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequencer::Sequencer;
use crate::pipeline::wait_strategy::WaitStrategy;
use crate::pipeline::{PipelineError, Result};

/// Shared cancellation flag raised to break consumers out of wait loops.
#[derive(Debug, Clone, Default)]
pub struct AlertFlag {
    raised: Arc<AtomicBool>,
}

impl AlertFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Error out of a wait loop if the flag is raised.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            Err(PipelineError::Alerted)
        } else {
            Ok(())
        }
    }
}

/// Coordination point between a consumer, the sequencer, and any upstream
/// processors the consumer depends on.
///
/// `wait_for` answers the only question a consumer asks: "what is the highest
/// sequence I may safely read?" For multi-producer sequencers the raw answer
/// from the wait strategy is further constrained to the contiguous published
/// run, since producers may publish out of claim order.
#[derive(Debug)]
pub struct SequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    dependents: DependentSequenceGroup,
    alert: AlertFlag,
}

impl SequenceBarrier {
    pub fn new(
        sequencer: Arc<dyn Sequencer>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependent_sequences: Vec<Arc<Sequence>>,
    ) -> Self {
        let dependents = DependentSequenceGroup::new(sequencer.cursor(), dependent_sequences);
        Self {
            sequencer,
            wait_strategy,
            dependents,
            alert: AlertFlag::new(),
        }
    }

    /// Block until `sequence` (or later) is consumable.
    ///
    /// Returns the highest safely-consumable sequence, which may exceed the
    /// request (a batch) or, after a spurious wakeup, trail it. `Err(Alerted)`
    /// and `Err(Timeout)` propagate from the wait strategy.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.alert.check()?;
        let available = self
            .wait_strategy
            .wait_for(sequence, &self.dependents, &self.alert)?;
        self.alert.check()?;

        if available < sequence {
            return Ok(available);
        }
        Ok(self
            .sequencer
            .highest_published_sequence(sequence, available))
    }

    /// The producer cursor, for diagnostics.
    pub fn cursor(&self) -> Arc<Sequence> {
        self.dependents.cursor()
    }

    /// Request that any waiting consumer abandon its wait.
    pub fn alert(&self) {
        self.alert.raise();
        self.wait_strategy.signal_all_when_blocking();
    }

    pub fn clear_alert(&self) {
        self.alert.clear();
    }

    pub fn is_alerted(&self) -> bool {
        self.alert.is_raised()
    }

    pub fn check_alert(&self) -> Result<()> {
        self.alert.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sequencer::SingleProducerSequencer;
    use crate::pipeline::wait_strategy::BusySpinWaitStrategy;

    fn barrier_over(sequencer: Arc<dyn Sequencer>) -> SequenceBarrier {
        let wait_strategy = sequencer.wait_strategy();
        SequenceBarrier::new(sequencer, wait_strategy, vec![])
    }

    #[test]
    fn wait_for_returns_published_sequences() {
        let sequencer: Arc<dyn Sequencer> = Arc::new(SingleProducerSequencer::new(
            16,
            Arc::new(BusySpinWaitStrategy::new()),
        ));
        let barrier = barrier_over(Arc::clone(&sequencer));

        let seq = sequencer.next().unwrap();
        sequencer.publish(seq);
        assert_eq!(barrier.wait_for(0).unwrap(), 0);
    }

    #[test]
    fn alert_short_circuits_wait() {
        let sequencer: Arc<dyn Sequencer> = Arc::new(SingleProducerSequencer::new(
            16,
            Arc::new(BusySpinWaitStrategy::new()),
        ));
        let barrier = barrier_over(sequencer);

        assert!(!barrier.is_alerted());
        barrier.alert();
        assert!(barrier.is_alerted());
        assert!(matches!(barrier.wait_for(0), Err(PipelineError::Alerted)));

        barrier.clear_alert();
        assert!(barrier.check_alert().is_ok());
    }

    #[test]
    fn dependent_sequences_gate_the_barrier() {
        let sequencer: Arc<dyn Sequencer> = Arc::new(SingleProducerSequencer::new(
            16,
            Arc::new(BusySpinWaitStrategy::new()),
        ));
        let upstream = Arc::new(Sequence::new(2));
        let wait_strategy = sequencer.wait_strategy();
        let barrier = SequenceBarrier::new(Arc::clone(&sequencer), wait_strategy, vec![upstream]);

        for _ in 0..6 {
            let seq = sequencer.next().unwrap();
            sequencer.publish(seq);
        }
        // Cursor is at 5 but the upstream consumer has only reached 2.
        assert_eq!(barrier.wait_for(0).unwrap(), 2);
    }
}
