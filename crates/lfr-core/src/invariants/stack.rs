//! Stack invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every pushed element is in the stack or was popped |
//! | NoDuplicates | No element appears twice in the stack |
//! | PoppedWerePushed | Every pop result was previously pushed |
//! | AtMostOncePop | No element is returned by two pops |
//! | LIFO_Order | A recorded sequential history replays against a model stack |
//!
//! Element values are assumed unique per run: harnesses push each value at
//! most once so that sets can stand in for multisets.

use std::collections::HashSet;

use crate::counterexample::{Counterexample, StateSnapshot};
use crate::property::{PropertyChecker, PropertyResult};

/// Properties that any stack implementation must expose for checking.
///
/// Implementations provide access to their observed state; the checker
/// verifies invariants against it.
pub trait StackProperties {
    /// Set of all elements that have been pushed.
    fn pushed_elements(&self) -> HashSet<u64>;

    /// Every successful pop result, in completion order.
    fn popped_elements(&self) -> Vec<u64>;

    /// Current contents of the stack (top to bottom).
    fn current_contents(&self) -> Vec<u64>;

    /// Operation history for LIFO order checking.
    /// Returns owned data to avoid lifetime issues with internal mutexes.
    fn history(&self) -> StackHistory;
}

/// History of stack operations in linearization order.
#[derive(Debug, Clone, Default)]
pub struct StackHistory {
    /// Sequence of operations in linearization order
    pub operations: Vec<StackOperation>,
}

/// A single stack operation.
#[derive(Debug, Clone)]
pub struct StackOperation {
    /// Thread that performed the operation
    pub thread_id: u64,
    /// Type of operation
    pub op_type: StackOpType,
    /// Element involved (pushed value, or pop result)
    pub element: Option<u64>,
    /// Step number for ordering
    pub step: u64,
}

/// Type of stack operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOpType {
    Push,
    Pop,
    PopEmpty,
}

impl StackHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a push operation.
    pub fn record_push(&mut self, thread_id: u64, element: u64, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(StackOperation {
            thread_id,
            op_type: StackOpType::Push,
            element: Some(element),
            step,
        });
    }

    /// Record a pop operation.
    pub fn record_pop(&mut self, thread_id: u64, element: Option<u64>, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(StackOperation {
            thread_id,
            op_type: if element.is_some() {
                StackOpType::Pop
            } else {
                StackOpType::PopEmpty
            },
            element,
            step,
        });
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Property checker for stack implementations.
pub struct StackPropertyChecker<'a, T: StackProperties> {
    stack: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: StackProperties> StackPropertyChecker<'a, T> {
    /// Create a new checker for the given stack.
    #[must_use]
    pub fn new(stack: &'a T) -> Self {
        Self {
            stack,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self) -> Counterexample {
        match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        }
    }

    /// Every element that was pushed must either be in the stack or have
    /// been popped.
    fn check_no_lost_elements(&self) -> PropertyResult {
        let pushed = self.stack.pushed_elements();
        let popped: HashSet<u64> = self.stack.popped_elements().into_iter().collect();
        let contents: HashSet<u64> = self.stack.current_contents().into_iter().collect();

        let mut lost: Vec<u64> = pushed
            .iter()
            .filter(|e| !contents.contains(e) && !popped.contains(e))
            .copied()
            .collect();

        if lost.is_empty() {
            return PropertyResult::pass("NoLostElements");
        }
        lost.sort_unstable();

        let mut ce = self.counterexample();
        ce.add_state(StateSnapshot {
            step: 1,
            description: format!("Elements {:?} lost", lost),
            variables: vec![
                ("pushed".to_string(), format!("{:?}", pushed)),
                ("popped".to_string(), format!("{:?}", popped)),
                ("contents".to_string(), format!("{:?}", contents)),
            ],
        });

        PropertyResult::fail(
            "NoLostElements",
            format!(
                "Element {} was pushed but is neither in stack nor popped",
                lost[0]
            ),
            Some(ce),
        )
    }

    /// No element appears twice in the stack.
    fn check_no_duplicates(&self) -> PropertyResult {
        let contents = self.stack.current_contents();
        let mut seen = HashSet::with_capacity(contents.len());

        for element in &contents {
            if !seen.insert(*element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} appears multiple times in stack", element),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates")
    }

    /// Every value a pop returned was handed to some push.
    fn check_popped_were_pushed(&self) -> PropertyResult {
        let pushed = self.stack.pushed_elements();

        match self
            .stack
            .popped_elements()
            .into_iter()
            .find(|e| !pushed.contains(e))
        {
            Some(stray) => PropertyResult::fail(
                "PoppedWerePushed",
                format!("Pop returned {} which was never pushed", stray),
                None,
            ),
            None => PropertyResult::pass("PoppedWerePushed"),
        }
    }

    /// No value is returned by more than one pop.
    fn check_at_most_once_pop(&self) -> PropertyResult {
        let popped = self.stack.popped_elements();
        let mut seen = HashSet::with_capacity(popped.len());

        for element in &popped {
            if !seen.insert(*element) {
                return PropertyResult::fail(
                    "AtMostOncePop",
                    format!("Element {} was returned by two pops", element),
                    None,
                );
            }
        }

        PropertyResult::pass("AtMostOncePop")
    }

    /// Replays the recorded history against a model `Vec` and checks every
    /// pop result. Only meaningful for histories recorded in linearization
    /// order; an empty history passes.
    fn check_lifo_order(&self) -> PropertyResult {
        let history = self.stack.history();
        let mut model_stack: Vec<u64> = Vec::new();

        for op in &history.operations {
            match op.op_type {
                StackOpType::Push => {
                    if let Some(e) = op.element {
                        model_stack.push(e);
                    }
                }
                StackOpType::Pop => {
                    let Some(actual) = op.element else { continue };
                    match model_stack.pop() {
                        Some(expected) if expected != actual => {
                            return PropertyResult::fail(
                                "LIFO_Order",
                                format!(
                                    "LIFO violated: pop returned {} but model expected {} (step {})",
                                    actual, expected, op.step
                                ),
                                None,
                            );
                        }
                        None => {
                            return PropertyResult::fail(
                                "LIFO_Order",
                                format!(
                                    "LIFO violated: pop returned {} but model stack was empty (step {})",
                                    actual, op.step
                                ),
                                None,
                            );
                        }
                        _ => {}
                    }
                }
                StackOpType::PopEmpty => {
                    if !model_stack.is_empty() {
                        return PropertyResult::fail(
                            "LIFO_Order",
                            format!(
                                "LIFO violated: pop returned None but model has {} elements (step {})",
                                model_stack.len(),
                                op.step
                            ),
                            None,
                        );
                    }
                }
            }
        }

        PropertyResult::pass("LIFO_Order")
    }
}

impl<T: StackProperties> PropertyChecker for StackPropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_lost_elements(),
            self.check_no_duplicates(),
            self.check_popped_were_pushed(),
            self.check_at_most_once_pop(),
            self.check_lifo_order(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestStack {
        pushed: HashSet<u64>,
        popped: Vec<u64>,
        contents: Vec<u64>,
        history: StackHistory,
    }

    impl TestStack {
        fn new() -> Self {
            Self {
                pushed: HashSet::new(),
                popped: Vec::new(),
                contents: Vec::new(),
                history: StackHistory::new(),
            }
        }

        fn push(&mut self, val: u64) {
            self.pushed.insert(val);
            self.contents.push(val);
            let step = self.history.len() as u64 + 1;
            self.history.record_push(0, val, step);
        }

        fn pop(&mut self) -> Option<u64> {
            let val = self.contents.pop();
            if let Some(v) = val {
                self.popped.push(v);
            }
            let step = self.history.len() as u64 + 1;
            self.history.record_pop(0, val, step);
            val
        }
    }

    impl StackProperties for TestStack {
        fn pushed_elements(&self) -> HashSet<u64> {
            self.pushed.clone()
        }

        fn popped_elements(&self) -> Vec<u64> {
            self.popped.clone()
        }

        fn current_contents(&self) -> Vec<u64> {
            // top to bottom
            self.contents.iter().rev().copied().collect()
        }

        fn history(&self) -> StackHistory {
            self.history.clone()
        }
    }

    fn result<'a>(results: &'a [PropertyResult], name: &str) -> &'a PropertyResult {
        results.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_correct_stack_passes_all() {
        let mut stack = TestStack::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);
        stack.pop();
        stack.pop();
        stack.pop();
        stack.pop();

        let checker = StackPropertyChecker::new(&stack);
        assert!(checker.all_hold(), "{:?}", checker.violations());
    }

    #[test]
    fn test_lost_element_detected() {
        let stack = TestStack {
            pushed: [1, 2, 3].into_iter().collect(),
            popped: vec![1],
            contents: vec![2],
            history: StackHistory::new(),
        };

        let results = StackPropertyChecker::new(&stack).with_seed(7).check_all();
        let no_lost = result(&results, "NoLostElements");
        assert!(!no_lost.holds);
        assert!(no_lost.violation.as_ref().unwrap().contains('3'));
        assert_eq!(no_lost.counterexample.as_ref().unwrap().dst_seed, Some(7));
    }

    #[test]
    fn test_duplicate_detected() {
        let stack = TestStack {
            pushed: [1, 2].into_iter().collect(),
            popped: Vec::new(),
            contents: vec![1, 1, 2],
            history: StackHistory::new(),
        };

        let results = StackPropertyChecker::new(&stack).check_all();
        assert!(!result(&results, "NoDuplicates").holds);
    }

    #[test]
    fn test_double_pop_detected() {
        let stack = TestStack {
            pushed: [5].into_iter().collect(),
            popped: vec![5, 5],
            contents: Vec::new(),
            history: StackHistory::new(),
        };

        let results = StackPropertyChecker::new(&stack).check_all();
        assert!(!result(&results, "AtMostOncePop").holds);
        assert!(result(&results, "PoppedWerePushed").holds);
    }

    #[test]
    fn test_garbage_pop_detected() {
        let stack = TestStack {
            pushed: [5].into_iter().collect(),
            popped: vec![0xDEAD],
            contents: vec![5],
            history: StackHistory::new(),
        };

        let results = StackPropertyChecker::new(&stack).check_all();
        let stray = result(&results, "PoppedWerePushed");
        assert!(!stray.holds);
        assert!(stray.violation.as_ref().unwrap().contains("57005"));
    }

    #[test]
    fn test_lifo_violation_detected() {
        let mut history = StackHistory::new();
        history.record_push(0, 1, 1);
        history.record_push(0, 2, 2);
        history.record_pop(0, Some(1), 3);

        let stack = TestStack {
            pushed: [1, 2].into_iter().collect(),
            popped: vec![1],
            contents: vec![2],
            history,
        };

        let results = StackPropertyChecker::new(&stack).check_all();
        assert!(!result(&results, "LIFO_Order").holds);
    }

    #[test]
    fn test_empty_pop_with_elements_is_lifo_violation() {
        let mut history = StackHistory::new();
        history.record_push(0, 1, 1);
        history.record_pop(0, None, 2);

        let stack = TestStack {
            pushed: [1].into_iter().collect(),
            popped: Vec::new(),
            contents: vec![1],
            history,
        };

        let results = StackPropertyChecker::new(&stack).check_all();
        let lifo = result(&results, "LIFO_Order");
        assert!(!lifo.holds);
        assert!(lifo.violation.as_ref().unwrap().contains("returned None"));
    }
}
