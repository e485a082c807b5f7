//! Property-based tests for stream and consumer group invariants
//!
//! These drive the in-memory stream structures directly with randomly
//! generated operation sequences.

use bytes::Bytes;
use proptest::prelude::*;
use std::collections::HashSet;

use inkstream::naming::validate_topic;
use inkstream::storage::{Stream, StreamEntryId};

// ============================================================================
// Test Strategies
// ============================================================================

/// Clock readings that may jump backwards, stall, or advance
fn clock_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1_000u64..1_010, 1..200)
}

fn entry(i: usize) -> Vec<(Bytes, Bytes)> {
    vec![(Bytes::from_static(b"body"), Bytes::from(i.to_string()))]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: IDs are strictly increasing whatever the wall clock does
    #[test]
    fn prop_ids_strictly_increase(clock in clock_strategy()) {
        let mut stream = Stream::new();
        let mut last = StreamEntryId::MIN;
        for (i, now) in clock.iter().enumerate() {
            let id = stream.add(entry(i), *now);
            prop_assert!(id > last, "{} not after {}", id, last);
            last = id;
        }
        prop_assert_eq!(stream.len(), clock.len());
    }

    /// Property: an ID renders to text that parses back to the same ID
    #[test]
    fn prop_id_text_form(ms in any::<u64>(), seq in any::<u64>()) {
        let id = StreamEntryId::new(ms, seq);
        prop_assert_eq!(StreamEntryId::parse(&id.to_string()), Some(id));
    }

    /// Property: consumers polling in any interleaving receive every entry
    /// exactly once, each in append order
    #[test]
    fn prop_competing_consumers_partition(
        n in 0usize..60,
        polls in prop::collection::vec((0usize..4, 1usize..8), 1..100),
    ) {
        let mut stream = Stream::new();
        stream.create_group("g", StreamEntryId::MIN);
        let appended: Vec<_> = (0..n).map(|i| stream.add(entry(i), 1_000)).collect();

        let mut seen = HashSet::new();
        let mut per_consumer: Vec<Vec<StreamEntryId>> = vec![Vec::new(); 4];
        let mut schedule = polls.into_iter().cycle();
        loop {
            let (consumer, count) = schedule.next().unwrap_or((0, 1));
            let got = stream
                .read_group("g", &format!("c{consumer}"), count, 1_000)
                .unwrap();
            if got.is_empty() && seen.len() == n {
                break;
            }
            for e in got {
                prop_assert!(seen.insert(e.id), "entry {} delivered twice", e.id);
                per_consumer[consumer].push(e.id);
            }
        }

        prop_assert_eq!(seen.len(), appended.len());
        for ids in per_consumer {
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
        prop_assert_eq!(stream.get_group("g").unwrap().pending_count(), n);
    }

    /// Property: after acking a subset, exactly the rest can be claimed and
    /// acked entries are never handed out again
    #[test]
    fn prop_acked_never_redelivered(
        n in 1usize..40,
        ack_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let mut stream = Stream::new();
        stream.create_group("g", StreamEntryId::MIN);
        for i in 0..n {
            stream.add(entry(i), 1_000);
        }
        let delivered = stream.read_group("g", "c1", n, 1_000).unwrap();

        let acked: Vec<_> = delivered
            .iter()
            .zip(&ack_mask)
            .filter(|(_, ack)| **ack)
            .map(|(e, _)| e.id)
            .collect();
        let group = stream.get_group_mut("g").unwrap();
        prop_assert_eq!(group.ack(&acked), acked.len());
        prop_assert_eq!(group.ack(&acked), 0);

        let reclaimed = stream
            .claim_pending("g", "c2", 0, None, usize::MAX, 2_000)
            .unwrap();
        prop_assert_eq!(reclaimed.len(), n - acked.len());
        for (entry, count) in &reclaimed {
            prop_assert!(!acked.contains(&entry.id));
            prop_assert_eq!(*count, 2);
        }
        prop_assert!(stream.read_group("g", "c3", n, 2_000).unwrap().is_empty());
    }

    /// Property: names outside the allowed alphabet are always rejected
    #[test]
    fn prop_name_validation(name in "[a-zA-Z0-9_:.-]{1,64}", bad in "[ /*?#]") {
        prop_assert!(validate_topic(&name).is_ok());
        let invalid = format!("{name}{bad}");
        prop_assert!(validate_topic(&invalid).is_err());
    }
}
