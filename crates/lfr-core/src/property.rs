//! Property results and the checker trait.

use serde::Serialize;

use crate::counterexample::Counterexample;

/// Outcome of checking one named invariant.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyResult {
    /// Invariant name (e.g. `NoLostElements`)
    pub name: String,
    /// Whether the invariant holds
    pub holds: bool,
    /// Explanation of the violation, if any
    pub violation: Option<String>,
    /// Failure path, if one was recorded
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    /// A passing result.
    #[must_use]
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    /// A failing result with an explanation.
    #[must_use]
    pub fn fail(
        name: impl Into<String>,
        violation: impl Into<String>,
        counterexample: Option<Counterexample>,
    ) -> Self {
        Self {
            name: name.into(),
            holds: false,
            violation: Some(violation.into()),
            counterexample,
        }
    }

    /// One-line status, e.g. `[PASS] NoDuplicates`.
    #[must_use]
    pub fn format_status(&self) -> String {
        match &self.violation {
            None => format!("[PASS] {}", self.name),
            Some(v) => format!("[FAIL] {}: {}", self.name, v),
        }
    }
}

/// Checks a set of invariants against some observed state.
pub trait PropertyChecker {
    /// Evaluate every invariant.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// True if every invariant holds.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// Only the violated invariants.
    fn violations(&self) -> Vec<PropertyResult> {
        self.check_all().into_iter().filter(|r| !r.holds).collect()
    }
}
