// tests/property/ids_test.rs

//! Session ids only ever grow, whatever is removed in between.

use partyline::core::orchestrator::SessionRegistry;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_ids_are_strictly_increasing(allocations in prop::collection::vec(0u8..4, 1..200)) {
        let registry = SessionRegistry::new();
        let mut last: Option<u64> = None;

        for burst in allocations {
            for _ in 0..burst {
                let next = registry.peek_next_id();
                let id = registry.allocate_id();
                prop_assert_eq!(id, next);
                if let Some(previous) = last {
                    prop_assert!(id > previous);
                }
                last = Some(id);
            }
            // Removing unknown or stale ids never rewinds the counter.
            prop_assert!(registry.remove(last.unwrap_or_default()).is_none());
            prop_assert!(registry.is_empty());
        }
    }
}
