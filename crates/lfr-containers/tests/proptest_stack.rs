//! Property tests: the reclaiming stack against a `Vec` model.
//!
//! Case count comes from `LFR_PROPTEST_CASES` (default 100).
#![cfg(not(loom))]

use proptest::prelude::*;

use lfr_containers::{ReclaimingStack, SpscQueue, TwoLockQueue};

fn proptest_cases() -> u32 {
    std::env::var("LFR_PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100)
}

#[derive(Debug, Clone)]
enum Op {
    Push(u64),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u64>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(proptest_cases()))]

    #[test]
    fn prop_matches_vec_model(ops in prop::collection::vec(op(), 0..300)) {
        let stack = ReclaimingStack::new();
        let mut model = Vec::new();

        for op in ops {
            match op {
                Op::Push(v) => {
                    stack.push(v);
                    model.push(v);
                }
                Op::Pop => prop_assert_eq!(stack.pop(), model.pop()),
            }
            prop_assert_eq!(stack.len(), model.len());
        }

        let expected: Vec<u64> = model.iter().rev().copied().collect();
        prop_assert_eq!(stack.snapshot(), expected);
    }

    #[test]
    fn prop_solo_pops_keep_memory_tight(ops in prop::collection::vec(op(), 0..300)) {
        let stack = ReclaimingStack::new();
        for op in ops {
            match op {
                Op::Push(v) => stack.push(v),
                Op::Pop => {
                    stack.pop();
                }
            }
            let stats = stack.stats();
            prop_assert_eq!(stats.nodes_retired, 0);
            prop_assert_eq!(stats.live_nodes(), stack.len() as u64);
        }
    }

    #[test]
    fn prop_push_pop_conservation(values in prop::collection::vec(any::<u64>(), 1..200)) {
        let stack = ReclaimingStack::new();
        for &v in &values {
            stack.push(v);
        }
        let mut popped = Vec::new();
        while let Some(v) = stack.pop() {
            popped.push(v);
        }
        let expected: Vec<u64> = values.into_iter().rev().collect();
        prop_assert_eq!(popped, expected);
        prop_assert!(stack.is_empty());
    }

    #[test]
    fn prop_queues_are_fifo(values in prop::collection::vec(any::<u32>(), 0..200)) {
        let (mut tx, mut rx) = SpscQueue::new();
        let locked = TwoLockQueue::new();
        for &v in &values {
            tx.push(v);
            locked.push(v);
        }
        for &v in &values {
            prop_assert_eq!(rx.try_pop(), Some(v));
            prop_assert_eq!(locked.try_pop(), Some(v));
        }
        prop_assert_eq!(rx.try_pop(), None);
        prop_assert_eq!(locked.try_pop(), None);
    }
}
