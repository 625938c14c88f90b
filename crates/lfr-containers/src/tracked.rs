//! Property-tracking wrapper around [`ReclaimingStack<u64>`].
//!
//! The stack itself carries no verification state. `TrackedStack` records
//! what went in and what came out so the `lfr-core` checkers can run
//! against the real implementation.
//!
//! Node ids are not observable on the real stack, so the reclamation view
//! is built from counters: retired nodes get positional ids, and only the
//! count-based checks are meaningful. `NoUseAfterFree` and `RetiredNotFreed`
//! pass here by construction. Use [`TrackedStack::counted_reclamation`]
//! instead of the full checker, while quiescent.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lfr_core::{
    PropertyChecker, PropertyResult, ReclamationProperties, ReclamationPropertyChecker,
    StackHistory, StackProperties,
};
use lfr_dst::DstTestableStack;

use crate::reclaiming_stack::{ReclaimingStack, StackConfig, StackStats};

/// Reclamation properties that the counters can actually falsify.
pub const COUNTED_RECLAMATION_PROPERTIES: &[&str] =
    &["NoDoubleFree", "NodeAccounting", "QuiescentDrain"];

/// A [`ReclaimingStack`] that records its history.
pub struct TrackedStack {
    stack: ReclaimingStack<u64>,
    tracker: Mutex<StackTracker>,
}

#[derive(Default)]
struct StackTracker {
    pushed: HashSet<u64>,
    popped: Vec<u64>,
    history: StackHistory,
    step: u64,
    /// Set by [`TrackedStack::quiesce`], cleared by the next operation.
    quiesced: bool,
}

impl TrackedStack {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StackConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StackConfig) -> Self {
        Self {
            stack: ReclaimingStack::with_config(config),
            tracker: Mutex::new(StackTracker::default()),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, StackTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push, recording the value. Values are expected to be unique per run.
    pub fn push(&self, value: u64) {
        self.push_from(0, value);
    }

    pub fn pop(&self) -> Option<u64> {
        self.pop_from(0)
    }

    /// Push on behalf of `thread_id` for history attribution.
    pub fn push_from(&self, thread_id: u64, value: u64) {
        self.stack.push(value);

        let mut tracker = self.tracker();
        tracker.pushed.insert(value);
        tracker.step += 1;
        tracker.quiesced = false;
        let step = tracker.step;
        tracker.history.record_push(thread_id, value, step);
    }

    pub fn pop_from(&self, thread_id: u64) -> Option<u64> {
        let value = self.stack.pop();

        let mut tracker = self.tracker();
        if let Some(v) = value {
            tracker.popped.push(v);
        }
        tracker.step += 1;
        tracker.quiesced = false;
        let step = tracker.step;
        tracker.history.record_pop(thread_id, value, step);
        value
    }

    /// Run a pop-registered walk with nothing else in flight, which drains
    /// the retirement list without changing the contents.
    pub fn quiesce(&mut self) -> Vec<u64> {
        let contents = self.stack.snapshot();
        self.tracker().quiesced = true;
        contents
    }

    #[must_use]
    pub fn inner(&self) -> &ReclaimingStack<u64> {
        &self.stack
    }

    #[must_use]
    pub fn stats(&self) -> StackStats {
        self.stack.stats()
    }

    /// Results of the count-based reclamation checks only.
    #[must_use]
    pub fn counted_reclamation(&self) -> Vec<PropertyResult> {
        ReclamationPropertyChecker::new(self)
            .check_all()
            .into_iter()
            .filter(|r| COUNTED_RECLAMATION_PROPERTIES.contains(&r.name.as_str()))
            .collect()
    }

    /// Violations among [`Self::counted_reclamation`].
    #[must_use]
    pub fn counted_reclamation_violations(&self) -> Vec<PropertyResult> {
        self.counted_reclamation()
            .into_iter()
            .filter(|r| !r.holds)
            .collect()
    }
}

impl Default for TrackedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl StackProperties for TrackedStack {
    fn pushed_elements(&self) -> HashSet<u64> {
        self.tracker().pushed.clone()
    }

    fn popped_elements(&self) -> Vec<u64> {
        self.tracker().popped.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.stack.snapshot()
    }

    fn history(&self) -> StackHistory {
        self.tracker().history.clone()
    }
}

impl ReclamationProperties for TrackedStack {
    fn freed_nodes(&self) -> HashSet<u64> {
        HashSet::new()
    }

    fn double_frees(&self) -> Vec<u64> {
        let stats = self.stack.stats();
        if stats.nodes_freed > stats.nodes_allocated {
            vec![stats.nodes_freed]
        } else {
            Vec::new()
        }
    }

    fn thread_references(&self) -> HashMap<u64, HashSet<u64>> {
        HashMap::new()
    }

    fn retired_nodes(&self) -> HashSet<u64> {
        (0..self.stack.retired_len() as u64).collect()
    }

    fn owned_nodes(&self) -> HashSet<u64> {
        HashSet::new()
    }

    fn live_nodes(&self) -> u64 {
        self.stack.stats().live_nodes()
    }

    fn linked_len(&self) -> u64 {
        self.stack.snapshot().len() as u64
    }

    fn threads_in_pop(&self) -> u64 {
        self.stack.threads_in_pop() as u64
    }

    fn solo_pop_since_retire(&self) -> bool {
        self.tracker().quiesced
    }
}

impl DstTestableStack for TrackedStack {
    fn new() -> Self {
        TrackedStack::new()
    }

    fn push(&self, value: u64) {
        TrackedStack::push(self, value);
    }

    fn pop(&self) -> Option<u64> {
        TrackedStack::pop(self)
    }

    fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    fn get_contents(&self) -> Vec<u64> {
        self.stack.snapshot()
    }

    fn retired_len(&self) -> usize {
        self.stack.retired_len()
    }
}
