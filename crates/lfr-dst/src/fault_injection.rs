//! Fault injection at operation boundaries.
//!
//! The structure under test is never instrumented. Faults are injected by
//! the runner before and after each `push`/`pop`, so the stack code is the
//! same code that ships.
//!
//! | Concern | Tool | Level |
//! |---------|------|-------|
//! | CAS races, counter/retire-list interleavings | loom, stateright model | Instruction |
//! | Abandoned callers, slow threads | DST | Operation boundary |
//! | Retirement-list growth | DST | Between operations |
//!
//! ```text
//! FaultPoint (pre-op) ──> stack.push()/pop() ──> FaultPoint (post-op)
//!        │                                              │
//!  "allocation fails?"                      "caller crashes before
//!                                            seeing the result?"
//! ```

use std::collections::HashSet;

use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;

/// Fault injection points (between operations, not inside).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Before starting an operation
    BeforeOperation,
    /// After operation completes (before returning to caller)
    AfterOperation,
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Node allocation refused; the push never starts
    AllocationFailure,
    /// Caller abandons the operation
    ThreadCrash,
    /// Caller is slow; nothing observable changes
    Delay,
}

/// Stack interface for DST.
///
/// Minimal on purpose: implementations know nothing about DST.
pub trait DstTestableStack: Send + Sync {
    fn new() -> Self;
    fn push(&self, value: u64);
    fn pop(&self) -> Option<u64>;
    fn is_empty(&self) -> bool;
    /// Current contents, top to bottom.
    fn get_contents(&self) -> Vec<u64>;
    /// Nodes waiting on the retirement list, for stacks that have one.
    fn retired_len(&self) -> usize {
        0
    }
}

/// Runs a stack under injected faults and tracks what must hold.
pub struct DstRunner<S> {
    stack: S,
    rng: DeterministicRng,
    fault_injector: FaultInjector,
    seed: u64,
    pushed: HashSet<u64>,
    popped: Vec<u64>,
    operations_count: u64,
    faults_injected: u64,
    abandoned_operations: u64,
    retired_len_max: usize,
}

impl<S: DstTestableStack> DstRunner<S> {
    /// Create a new DST runner with default fault rates.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            stack: S::new(),
            rng: DeterministicRng::new(seed),
            fault_injector: FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config),
            seed,
            pushed: HashSet::new(),
            popped: Vec::new(),
            operations_count: 0,
            faults_injected: 0,
            abandoned_operations: 0,
            retired_len_max: 0,
        }
    }

    /// Get the seed for reproduction.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The stack under test.
    #[must_use]
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Push with fault injection at boundaries.
    pub fn push(&mut self, value: u64) -> Result<(), FaultType> {
        if let Some(fault) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            match fault {
                FaultType::ThreadCrash => {
                    self.abandoned_operations += 1;
                    return Err(fault);
                }
                FaultType::AllocationFailure => return Err(fault),
                FaultType::Delay => {}
            }
        }

        self.stack.push(value);
        self.operations_count += 1;
        // The push completed, so the value is in the stack whatever the
        // caller does next.
        self.pushed.insert(value);
        self.observe_retired();

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        Ok(())
    }

    /// Pop with fault injection at boundaries.
    pub fn pop(&mut self) -> Result<Option<u64>, FaultType> {
        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        let result = self.stack.pop();
        self.operations_count += 1;
        if let Some(value) = result {
            self.popped.push(value);
        }
        self.observe_retired();

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            // Value was popped, but the caller dropped it.
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        Ok(result)
    }

    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Option<FaultType> {
        if !self.fault_injector.should_fail() {
            return None;
        }
        self.faults_injected += 1;
        let fault = match (point, self.rng.gen_range(0..3)) {
            (FaultPoint::BeforeOperation, 0) => FaultType::AllocationFailure,
            (_, 1) => FaultType::ThreadCrash,
            _ => FaultType::Delay,
        };
        Some(fault)
    }

    fn observe_retired(&mut self) {
        self.retired_len_max = self.retired_len_max.max(self.stack.retired_len());
    }

    /// Every pushed element is in the stack or was popped.
    #[must_use]
    pub fn check_no_lost_elements(&self) -> bool {
        let contents: HashSet<u64> = self.stack.get_contents().into_iter().collect();
        let popped: HashSet<u64> = self.popped.iter().copied().collect();
        self.pushed
            .iter()
            .all(|e| contents.contains(e) || popped.contains(e))
    }

    /// No element appears twice in the stack.
    #[must_use]
    pub fn check_no_duplicates(&self) -> bool {
        let contents = self.stack.get_contents();
        let unique: HashSet<_> = contents.iter().collect();
        contents.len() == unique.len()
    }

    /// No element was returned by two pops, and every pop result was pushed.
    #[must_use]
    pub fn check_pops_unique(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.popped.len());
        self.popped
            .iter()
            .all(|e| self.pushed.contains(e) && seen.insert(*e))
    }

    #[must_use]
    pub fn stats(&self) -> DstStats {
        DstStats {
            seed: self.seed,
            operations_count: self.operations_count,
            faults_injected: self.faults_injected,
            abandoned_operations: self.abandoned_operations,
            retired_len_max: self.retired_len_max,
        }
    }
}

/// Statistics from a DST run.
#[derive(Debug, Clone)]
pub struct DstStats {
    pub seed: u64,
    pub operations_count: u64,
    pub faults_injected: u64,
    pub abandoned_operations: u64,
    /// Largest retirement list observed between operations
    pub retired_len_max: usize,
}

impl DstStats {
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} retired_max={}",
            self.seed,
            self.operations_count,
            self.faults_injected,
            self.abandoned_operations,
            self.retired_len_max
        )
    }
}

/// DST operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    Push(u64),
    Pop,
}

/// Generate `count` operations with unique push values.
pub fn random_ops(rng: &mut DeterministicRng, count: usize) -> Vec<DstOp> {
    let mut next_value = 1;
    (0..count)
        .map(|_| {
            if rng.gen_bool(0.5) {
                let op = DstOp::Push(next_value);
                next_value += 1;
                op
            } else {
                DstOp::Pop
            }
        })
        .collect()
}

/// Run a DST scenario. Invariants are checked at the end.
pub fn run_dst_scenario<S: DstTestableStack>(seed: u64, operations: Vec<DstOp>) -> DstResult {
    let mut runner: DstRunner<S> = DstRunner::new(seed);
    let mut fault_errors = Vec::new();

    for op in operations {
        let result = match op {
            DstOp::Push(v) => runner.push(v),
            DstOp::Pop => runner.pop().map(|_| ()),
        };
        // Faults are part of the test.
        if let Err(fault) = result {
            fault_errors.push(format!("{:?}", fault));
        }
    }

    let no_lost_elements = runner.check_no_lost_elements();
    let no_duplicates = runner.check_no_duplicates();
    let pops_unique = runner.check_pops_unique();

    DstResult {
        passed: no_lost_elements && no_duplicates && pops_unique,
        no_lost_elements,
        no_duplicates,
        pops_unique,
        stats: runner.stats(),
        fault_errors,
    }
}

/// DST result.
#[derive(Debug)]
pub struct DstResult {
    pub passed: bool,
    pub no_lost_elements: bool,
    pub no_duplicates: bool,
    pub pops_unique: bool,
    pub stats: DstStats,
    pub fault_errors: Vec<String>,
}

impl DstResult {
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut result = format!("[{}] {}", status, self.stats.format());

        if !self.no_lost_elements {
            result.push_str("\n  VIOLATION: NoLostElements");
        }
        if !self.no_duplicates {
            result.push_str("\n  VIOLATION: NoDuplicates");
        }
        if !self.pops_unique {
            result.push_str("\n  VIOLATION: AtMostOncePop");
        }

        result
    }
}
