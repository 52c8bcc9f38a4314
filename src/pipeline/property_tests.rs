//! Property-based checks over the claim/publish protocols.

use proptest::prelude::*;
use std::sync::Arc;

use crate::pipeline::sequence::Sequence;
use crate::pipeline::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::pipeline::wait_strategy::BusySpinWaitStrategy;

fn single(buffer_size: usize) -> SingleProducerSequencer {
    SingleProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new()))
}

fn multi(buffer_size: usize) -> MultiProducerSequencer {
    MultiProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new())).unwrap()
}

mod sequence_properties {
    use super::*;

    proptest! {
        #[test]
        fn set_then_get_round_trips(value in any::<i64>()) {
            let seq = Sequence::new(0);
            seq.set(value);
            prop_assert_eq!(seq.get(), value);
        }

        #[test]
        fn get_and_add_accumulates(initial in -1_000_000i64..1_000_000, deltas in prop::collection::vec(1i64..100, 1..50)) {
            let seq = Sequence::new(initial);
            let mut expected = initial;
            for delta in deltas {
                prop_assert_eq!(seq.get_and_add(delta), expected);
                expected += delta;
            }
            prop_assert_eq!(seq.get(), expected);
        }

        #[test]
        fn compare_and_set_is_exact(initial in any::<i64>(), wrong in any::<i64>(), new in any::<i64>()) {
            prop_assume!(wrong != initial);
            let seq = Sequence::new(initial);
            prop_assert!(!seq.compare_and_set(wrong, new));
            prop_assert_eq!(seq.get(), initial);
            prop_assert!(seq.compare_and_set(initial, new));
            prop_assert_eq!(seq.get(), new);
        }
    }
}

mod single_producer_properties {
    use super::*;

    proptest! {
        /// Claims are strictly monotonic and never outrun the gate by more
        /// than the buffer size.
        #[test]
        fn claims_stay_wrap_safe(
            size_power in 1u32..10,
            batches in prop::collection::vec(1i64..8, 1..40),
        ) {
            let buffer_size = 1usize << size_power;
            let sequencer = single(buffer_size);
            let gate = Arc::new(Sequence::default());
            sequencer.add_gating_sequences(std::slice::from_ref(&gate));

            let mut last = -1i64;
            for n in batches {
                let n = n.min(buffer_size as i64);
                // The gate keeps pace below, so every claim must succeed.
                let high = sequencer.try_next_n(n).unwrap();
                prop_assert!(high > last);
                prop_assert!(high - gate.get() <= buffer_size as i64);
                sequencer.publish(high);
                last = high;
                gate.set(high);
            }
        }

        #[test]
        fn publish_makes_sequences_available(size_power in 1u32..8, count in 1usize..16) {
            let buffer_size = 1usize << size_power;
            let sequencer = single(buffer_size);
            let gate = Arc::new(Sequence::default());
            sequencer.add_gating_sequences(std::slice::from_ref(&gate));

            for _ in 0..count.min(buffer_size) {
                let seq = sequencer.try_next().unwrap();
                prop_assert!(!sequencer.is_available(seq));
                sequencer.publish(seq);
                prop_assert!(sequencer.is_available(seq));
                gate.set(seq);
            }
        }
    }
}

mod multi_producer_properties {
    use super::*;

    proptest! {
        /// Every claim is unique regardless of batch sizes.
        #[test]
        fn claims_are_unique(
            size_power in 2u32..8,
            batches in prop::collection::vec(1i64..4, 1..20),
        ) {
            let buffer_size = 1usize << size_power;
            let sequencer = multi(buffer_size);
            let gate = Arc::new(Sequence::default());
            sequencer.add_gating_sequences(std::slice::from_ref(&gate));

            let mut seen = std::collections::HashSet::new();
            for n in batches {
                if let Ok(high) = sequencer.try_next_n(n) {
                    for seq in (high - n + 1)..=high {
                        prop_assert!(seen.insert(seq));
                    }
                    sequencer.publish_range(high - n + 1, high);
                    gate.set(high);
                }
            }
        }

        /// After every claimed sequence is published, the contiguous run
        /// reaches the cursor, regardless of publish order.
        #[test]
        fn contiguous_run_reaches_cursor(size_power in 2u32..8, count in 2usize..16) {
            let buffer_size = 1usize << size_power;
            let sequencer = multi(buffer_size);
            let gate = Arc::new(Sequence::default());
            sequencer.add_gating_sequences(std::slice::from_ref(&gate));

            let count = count.min(buffer_size) as i64;
            let mut claimed: Vec<i64> = Vec::new();
            for _ in 0..count {
                claimed.push(sequencer.try_next().unwrap());
            }
            // Publish in reverse claim order.
            for &seq in claimed.iter().rev() {
                sequencer.publish(seq);
            }
            let cursor = sequencer.cursor().get();
            prop_assert_eq!(cursor, count - 1);
            prop_assert_eq!(sequencer.highest_published_sequence(0, cursor), cursor);
        }

        /// A gap in the published range truncates the contiguous run.
        #[test]
        fn gap_truncates_run(size_power in 3u32..8, gap_at in 1i64..6) {
            let buffer_size = 1usize << size_power;
            let sequencer = multi(buffer_size);
            let gate = Arc::new(Sequence::default());
            sequencer.add_gating_sequences(std::slice::from_ref(&gate));

            let total = 7i64.min(buffer_size as i64 - 1);
            prop_assume!(gap_at < total);
            for _ in 0..=total {
                sequencer.try_next().unwrap();
            }
            for seq in 0..=total {
                if seq != gap_at {
                    sequencer.publish(seq);
                }
            }
            prop_assert_eq!(
                sequencer.highest_published_sequence(0, total),
                gap_at - 1
            );
        }
    }
}
