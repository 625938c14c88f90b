//! Node-lifetime invariants for pop-counting deferred reclamation.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoUseAfterFree | No in-flight pop holds a reference to a freed node |
//! | NoDoubleFree | No node is freed twice |
//! | RetiredNotFreed | The retirement list never contains a freed node |
//! | NodeAccounting | Live nodes = linked + retired + owned by in-flight pops |
//! | QuiescentDrain | After a solo pop with nothing in flight, the retirement list is empty |
//!
//! Nodes are identified by stable ids (allocation order), so the same
//! checker runs against the exhaustive model and against instrumented
//! harnesses around the real stack.

use std::collections::{HashMap, HashSet};

use crate::counterexample::{Counterexample, MemoryIssue};
use crate::property::{PropertyChecker, PropertyResult};

/// Observable node-lifetime state of a reclaiming container.
pub trait ReclamationProperties {
    /// Ids of nodes that have been freed.
    fn freed_nodes(&self) -> HashSet<u64>;

    /// Ids of nodes freed more than once, in detection order.
    fn double_frees(&self) -> Vec<u64>;

    /// Map: thread_id -> node ids the thread may still dereference
    /// (its captured old head while inside `pop`).
    fn thread_references(&self) -> HashMap<u64, HashSet<u64>>;

    /// Ids of nodes currently on the retirement list.
    fn retired_nodes(&self) -> HashSet<u64>;

    /// Ids of unlinked nodes a thread owns exclusively (not yet freed or retired).
    fn owned_nodes(&self) -> HashSet<u64>;

    /// Allocated minus freed.
    fn live_nodes(&self) -> u64;

    /// Number of nodes reachable from head.
    fn linked_len(&self) -> u64;

    /// Current value of the pop-in-progress counter.
    fn threads_in_pop(&self) -> u64;

    /// True once a pop has completed alone since the last retirement.
    fn solo_pop_since_retire(&self) -> bool {
        false
    }
}

/// Property checker for reclamation state.
pub struct ReclamationPropertyChecker<'a, T: ReclamationProperties> {
    state: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: ReclamationProperties> ReclamationPropertyChecker<'a, T> {
    #[must_use]
    pub fn new(state: &'a T) -> Self {
        Self {
            state,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self) -> Counterexample {
        match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        }
    }

    fn check_no_use_after_free(&self) -> PropertyResult {
        let freed = self.state.freed_nodes();
        let refs = self.state.thread_references();

        let mut tids: Vec<_> = refs.keys().copied().collect();
        tids.sort_unstable();

        for tid in tids {
            let mut dangling: Vec<u64> = refs[&tid].intersection(&freed).copied().collect();
            if dangling.is_empty() {
                continue;
            }
            dangling.sort_unstable();

            let mut ce = self.counterexample();
            for node in &dangling {
                ce.add_memory_issue(MemoryIssue::UseAfterFree {
                    node: *node,
                    freed_at_step: 0,
                    used_at_step: 0,
                });
            }
            return PropertyResult::fail(
                "NoUseAfterFree",
                format!("Thread {} holds references to freed nodes: {:?}", tid, dangling),
                Some(ce),
            );
        }

        PropertyResult::pass("NoUseAfterFree")
    }

    fn check_no_double_free(&self) -> PropertyResult {
        let doubles = self.state.double_frees();
        let Some(first) = doubles.first() else {
            return PropertyResult::pass("NoDoubleFree");
        };

        let mut ce = self.counterexample();
        for node in &doubles {
            ce.add_memory_issue(MemoryIssue::DoubleFree {
                node: *node,
                step: 0,
            });
        }
        PropertyResult::fail(
            "NoDoubleFree",
            format!("Node N{} freed more than once", first),
            Some(ce),
        )
    }

    fn check_retired_not_freed(&self) -> PropertyResult {
        let freed = self.state.freed_nodes();
        let mut both: Vec<u64> = self
            .state
            .retired_nodes()
            .intersection(&freed)
            .copied()
            .collect();

        if both.is_empty() {
            return PropertyResult::pass("RetiredNotFreed");
        }
        both.sort_unstable();
        PropertyResult::fail(
            "RetiredNotFreed",
            format!("Freed nodes still on the retirement list: {:?}", both),
            None,
        )
    }

    fn check_node_accounting(&self) -> PropertyResult {
        let live = self.state.live_nodes();
        let linked = self.state.linked_len();
        let retired = self.state.retired_nodes().len() as u64;
        let owned = self.state.owned_nodes().len() as u64;
        let expected = linked + retired + owned;

        if live == expected {
            return PropertyResult::pass("NodeAccounting");
        }

        let description = if live > expected {
            format!(
                "{} live nodes unaccounted for (live={}, linked={}, retired={}, owned={})",
                live - expected,
                live,
                linked,
                retired,
                owned
            )
        } else {
            format!(
                "Fewer live nodes than reachable ones (live={}, linked={}, retired={}, owned={})",
                live, linked, retired, owned
            )
        };
        PropertyResult::fail("NodeAccounting", description, None)
    }

    fn check_quiescent_drain(&self) -> PropertyResult {
        if self.state.threads_in_pop() != 0 || !self.state.solo_pop_since_retire() {
            return PropertyResult::pass("QuiescentDrain");
        }

        let retired = self.state.retired_nodes();
        if retired.is_empty() {
            return PropertyResult::pass("QuiescentDrain");
        }

        let mut ce = self.counterexample();
        let mut nodes: Vec<u64> = retired.into_iter().collect();
        nodes.sort_unstable();
        for node in &nodes {
            ce.add_memory_issue(MemoryIssue::Leak {
                node: *node,
                unlinked_at_step: 0,
            });
        }
        PropertyResult::fail(
            "QuiescentDrain",
            format!("Retirement list not drained after a solo pop: {:?}", nodes),
            Some(ce),
        )
    }
}

impl<T: ReclamationProperties> PropertyChecker for ReclamationPropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_use_after_free(),
            self.check_no_double_free(),
            self.check_retired_not_freed(),
            self.check_node_accounting(),
            self.check_quiescent_drain(),
        ]
    }
}
