//! Oracle-driven scheduler for DST.
//!
//! Replays specific interleavings of the push/pop/reclaim protocol, either
//! extracted from exhaustive model checking or written by hand, and falls
//! back to seeded random scheduling once the trace is exhausted.
//!
//! ```text
//! model checking ──> oracle extraction ──> OracleScheduler ──> step-level executor
//! ```

use crate::scheduler::{ScheduleDecision, Scheduler};
use crate::DeterministicRng;

/// One atomic step of the protocol, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleActionType {
    /// Allocate node for push
    PushAlloc,
    /// Read head into the new node's next
    PushReadHead,
    /// CAS head to the new node
    PushCas,
    /// Increment the pop-in-progress counter
    PopEnter,
    /// Read head as the candidate old head
    PopReadHead,
    /// Dereference old head to read its next
    PopReadNext,
    /// CAS head from old head to its next
    PopCas,
    /// Compare the counter with 1
    ReclaimCheck,
    /// Exchange the retirement list for empty
    TakeRetired,
    /// Decrement the counter after taking the list
    Decrement,
    /// Free every node of the taken batch
    FreeTaken,
    /// Put the taken batch back on the retirement list
    ChainTaken,
    /// Free this call's own unlinked node
    FreeOwn,
    /// Append this call's own node to the retirement list
    ChainOwn,
    /// Decrement the counter after deferring
    DecrementAfterChain,
}

impl OracleActionType {
    /// Short lowercase name used in trace listings.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::PushAlloc => "push_alloc",
            Self::PushReadHead => "push_read_head",
            Self::PushCas => "push_cas",
            Self::PopEnter => "pop_enter",
            Self::PopReadHead => "pop_read_head",
            Self::PopReadNext => "pop_read_next",
            Self::PopCas => "pop_cas",
            Self::ReclaimCheck => "reclaim_check",
            Self::TakeRetired => "take_retired",
            Self::Decrement => "decrement",
            Self::FreeTaken => "free_taken",
            Self::ChainTaken => "chain_taken",
            Self::FreeOwn => "free_own",
            Self::ChainOwn => "chain_own",
            Self::DecrementAfterChain => "decrement_after_chain",
        }
    }
}

/// A single step in an oracle trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleStep {
    /// Thread that should execute
    pub thread: usize,
    /// Expected action type
    pub action_type: OracleActionType,
    /// Optional value (for push)
    pub value: Option<u64>,
}

/// Oracle trace to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleTrace {
    /// Name for debugging
    pub name: String,
    /// Steps to replay
    pub steps: Vec<OracleStep>,
    /// Description
    pub description: String,
}

impl OracleTrace {
    /// Create a new oracle trace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            description: String::new(),
        }
    }

    /// Add a step.
    pub fn add_step(&mut self, thread: usize, action_type: OracleActionType, value: Option<u64>) {
        self.steps.push(OracleStep {
            thread,
            action_type,
            value,
        });
    }

    /// Add several value-less steps for one thread.
    pub fn add_steps(&mut self, thread: usize, action_types: &[OracleActionType]) {
        for action_type in action_types {
            self.add_step(thread, *action_type, None);
        }
    }

    /// Set description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Distinct threads appearing in the trace.
    #[must_use]
    pub fn threads_count(&self) -> usize {
        self.steps.iter().map(|s| s.thread + 1).max().unwrap_or(0)
    }

    /// Number of steps of a given type.
    #[must_use]
    pub fn count(&self, action_type: OracleActionType) -> usize {
        self.steps
            .iter()
            .filter(|s| s.action_type == action_type)
            .count()
    }

    /// Human-readable listing.
    #[must_use]
    pub fn format_trace(&self) -> String {
        let mut output = format!("Oracle: {}\n", self.name);
        if !self.description.is_empty() {
            output.push_str(&format!("Description: {}\n", self.description));
        }
        for (i, step) in self.steps.iter().enumerate() {
            match step.value {
                Some(v) => output.push_str(&format!(
                    "  {:3}. T{}: {}({})\n",
                    i + 1,
                    step.thread,
                    step.action_type.label(),
                    v
                )),
                None => output.push_str(&format!(
                    "  {:3}. T{}: {}\n",
                    i + 1,
                    step.thread,
                    step.action_type.label()
                )),
            }
        }
        output
    }
}

/// Scheduler that replays oracle traces.
///
/// Combines oracle-driven scheduling with fallback to random scheduling.
pub struct OracleScheduler {
    oracle: Option<OracleTrace>,
    oracle_position: usize,
    fallback: Scheduler,
    oracle_steps_executed: u64,
    fallback_decisions: u64,
}

impl OracleScheduler {
    /// Create a new oracle scheduler.
    ///
    /// `seed` drives the fallback scheduler used once the oracle (if any)
    /// is exhausted.
    #[must_use]
    pub fn new(oracle: Option<OracleTrace>, seed: u64, threads_count: usize) -> Self {
        let rng = DeterministicRng::new(seed);
        let fallback = Scheduler::new(rng, threads_count, 0.2);

        Self {
            oracle,
            oracle_position: 0,
            fallback,
            oracle_steps_executed: 0,
            fallback_decisions: 0,
        }
    }

    /// Create with just an oracle.
    #[must_use]
    pub fn from_oracle(oracle: OracleTrace, threads_count: usize) -> Self {
        Self::new(Some(oracle), 12345, threads_count)
    }

    fn current_step(&self) -> Option<&OracleStep> {
        self.oracle
            .as_ref()
            .and_then(|o| o.steps.get(self.oracle_position))
    }

    /// Current thread according to oracle or fallback.
    #[must_use]
    pub fn current_thread(&self) -> usize {
        match self.current_step() {
            Some(step) => step.thread,
            None => self.fallback.current_thread(),
        }
    }

    /// The next expected action type (if following oracle).
    #[must_use]
    pub fn expected_action(&self) -> Option<OracleActionType> {
        self.current_step().map(|s| s.action_type)
    }

    /// The expected value for current step (if any).
    #[must_use]
    pub fn expected_value(&self) -> Option<u64> {
        self.current_step().and_then(|s| s.value)
    }

    /// Advance to next oracle step.
    ///
    /// Call this after an action completes that matches the oracle.
    pub fn advance(&mut self) {
        if self.is_following_oracle() {
            self.oracle_position += 1;
            self.oracle_steps_executed += 1;
        }
    }

    /// Check if we're still following the oracle.
    #[must_use]
    pub fn is_following_oracle(&self) -> bool {
        self.current_step().is_some()
    }

    /// Check if oracle is complete.
    #[must_use]
    pub fn oracle_complete(&self) -> bool {
        !self.is_following_oracle()
    }

    /// Make a scheduling decision.
    ///
    /// If following oracle, returns the thread specified by oracle.
    /// Otherwise, uses fallback scheduler.
    pub fn decide(&mut self) -> ScheduleDecision {
        if let Some(step) = self.current_step() {
            return ScheduleDecision::SwitchTo(step.thread);
        }
        self.fallback_decisions += 1;
        self.fallback.decide()
    }

    /// Move the fallback scheduler off a thread that cannot run.
    pub fn skip_current(&mut self) -> ScheduleDecision {
        self.fallback_decisions += 1;
        self.fallback.force_switch()
    }

    #[must_use]
    pub fn stats(&self) -> OracleSchedulerStats {
        OracleSchedulerStats {
            oracle_name: self.oracle.as_ref().map(|o| o.name.clone()),
            oracle_steps_total: self.oracle.as_ref().map_or(0, |o| o.steps.len()),
            oracle_steps_executed: self.oracle_steps_executed,
            fallback_decisions: self.fallback_decisions,
            oracle_complete: self.oracle_complete(),
        }
    }
}

/// Statistics from oracle scheduler.
#[derive(Debug, Clone)]
pub struct OracleSchedulerStats {
    pub oracle_name: Option<String>,
    pub oracle_steps_total: usize,
    pub oracle_steps_executed: u64,
    pub fallback_decisions: u64,
    pub oracle_complete: bool,
}

impl OracleSchedulerStats {
    #[must_use]
    pub fn format(&self) -> String {
        match &self.oracle_name {
            Some(name) => format!(
                "Oracle '{}': {}/{} steps, {} fallback, complete={}",
                name,
                self.oracle_steps_executed,
                self.oracle_steps_total,
                self.fallback_decisions,
                self.oracle_complete
            ),
            None => format!("Random scheduling: {} decisions", self.fallback_decisions),
        }
    }
}

/// Hand-written traces of the reclamation protocol.
///
/// All of them assume a stack pre-filled with at least three nodes and a
/// thread program of pops (plus one push for `push_pop_race`).
pub mod scenarios {
    use super::OracleActionType::*;
    use super::*;

    /// All standard reclamation scenarios for the reclaiming stack.
    #[must_use]
    pub fn all_reclaim_scenarios() -> Vec<OracleTrace> {
        vec![
            solo_pop_reclaims(),
            concurrent_pop_defers(),
            rechain_taken_batch(),
            push_pop_race(0, 1, 100),
        ]
    }

    /// A lone popper frees its node immediately.
    #[must_use]
    pub fn solo_pop_reclaims() -> OracleTrace {
        let mut trace = OracleTrace::new("solo_pop_reclaims")
            .with_description("T0 pops alone: counter is 1, node freed at once");
        trace.add_steps(
            0,
            &[
                PopEnter,
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                TakeRetired,
                Decrement,
                FreeTaken,
                FreeOwn,
            ],
        );
        trace
    }

    /// T1 unlinks the node T0 is holding; T1 must defer it, and T0 later
    /// dereferences it safely and frees it as the last popper out.
    #[must_use]
    pub fn concurrent_pop_defers() -> OracleTrace {
        let mut trace = OracleTrace::new("concurrent_pop_defers")
            .with_description("T0 holds old head while T1 unlinks it; T1 defers, T0 frees");
        trace.add_steps(0, &[PopEnter, PopReadHead]);
        trace.add_steps(
            1,
            &[
                PopEnter,
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                ChainOwn,
                DecrementAfterChain,
            ],
        );
        trace.add_steps(
            0,
            &[
                PopReadNext,
                PopCas, // fails: head moved
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                TakeRetired,
                Decrement,
                FreeTaken,
                FreeOwn,
            ],
        );
        trace
    }

    /// The reclaiming thread takes a batch, another popper arrives before
    /// the decrement, so the batch goes back while the own node is freed.
    #[must_use]
    pub fn rechain_taken_batch() -> OracleTrace {
        let mut trace = OracleTrace::new("rechain_taken_batch")
            .with_description("T0 takes the retired batch, T1 enters, T0 re-chains it");
        trace.add_steps(0, &[PopEnter, PopReadHead]);
        trace.add_steps(
            1,
            &[
                PopEnter,
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                ChainOwn,
                DecrementAfterChain,
            ],
        );
        trace.add_steps(
            0,
            &[
                PopReadNext,
                PopCas, // fails
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                TakeRetired,
            ],
        );
        trace.add_steps(1, &[PopEnter]);
        trace.add_steps(0, &[Decrement, ChainTaken, FreeOwn]);
        trace.add_steps(
            1,
            &[
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                TakeRetired,
                Decrement,
                FreeTaken,
                FreeOwn,
            ],
        );
        trace
    }

    /// Push and pop racing for head.
    #[must_use]
    pub fn push_pop_race(pusher: usize, popper: usize, value: u64) -> OracleTrace {
        let mut trace = OracleTrace::new("push_pop_race")
            .with_description("Popper reads head, pusher swaps it, popper retries");
        trace.add_step(pusher, PushAlloc, Some(value));
        trace.add_steps(pusher, &[PushReadHead]);
        trace.add_steps(popper, &[PopEnter, PopReadHead, PopReadNext]);
        trace.add_steps(pusher, &[PushCas]);
        trace.add_steps(
            popper,
            &[
                PopCas, // fails: pusher moved head
                PopReadHead,
                PopReadNext,
                PopCas,
                ReclaimCheck,
                TakeRetired,
                Decrement,
                FreeTaken,
                FreeOwn,
            ],
        );
        trace
    }

    /// Free-on-unlink baseline: T1 frees the node T0 is about to read.
    #[must_use]
    pub fn free_on_unlink_use_after_free() -> OracleTrace {
        let mut trace = OracleTrace::new("free_on_unlink_use_after_free")
            .with_description("T1 frees old head right after unlinking; T0 then reads its next");
        trace.add_steps(0, &[PopEnter, PopReadHead]);
        trace.add_steps(1, &[PopEnter, PopReadHead, PopReadNext, PopCas, FreeOwn]);
        trace.add_steps(0, &[PopReadNext]);
        trace
    }
}
