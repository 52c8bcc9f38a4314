//! Aggregation of upstream sequences into a single "minimum available" view.

use std::sync::Arc;

use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequence_barrier::AlertFlag;
use crate::pipeline::Result;

/// The set of sequences a consumer must trail behind.
///
/// A root consumer (no upstream processors) tracks the producer cursor
/// directly; a downstream consumer tracks the minimum of its upstream
/// processors' sequences instead, which is always ≤ the cursor.
#[derive(Debug, Clone)]
pub struct DependentSequenceGroup {
    cursor: Arc<Sequence>,
    dependents: Vec<Arc<Sequence>>,
}

impl DependentSequenceGroup {
    pub fn new(cursor: Arc<Sequence>, dependents: Vec<Arc<Sequence>>) -> Self {
        Self { cursor, dependents }
    }

    /// Highest sequence this group allows a consumer to reach.
    #[inline]
    pub fn value(&self) -> i64 {
        if self.dependents.is_empty() {
            self.cursor.get()
        } else {
            Sequence::minimum(&self.dependents, i64::MAX)
        }
    }

    /// The producer cursor, independent of upstream dependents.
    #[inline]
    pub fn cursor_value(&self) -> i64 {
        self.cursor.get()
    }

    pub fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    /// Aggressive spin until `value() >= expected`, checking for cancellation
    /// on every iteration. Burns a full core; pair with dedicated CPUs.
    pub fn spin_until(&self, expected: i64, alert: &AlertFlag) -> Result<i64> {
        loop {
            alert.check()?;
            let available = self.value();
            if available >= expected {
                return Ok(available);
            }
            std::hint::spin_loop();
        }
    }

    /// Polite spin: as `spin_until` but yields the thread between checks.
    pub fn yield_until(&self, expected: i64, alert: &AlertFlag) -> Result<i64> {
        loop {
            alert.check()?;
            let available = self.value();
            if available >= expected {
                return Ok(available);
            }
            std::thread::yield_now();
        }
    }
}
