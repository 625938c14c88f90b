//! Counterexample representation and rendering.
//!
//! When a property violation is detected, a counterexample shows the
//! interleaving of pop/reclaim steps that led to the failure.

use std::fmt;

use serde::Serialize;

/// A counterexample showing the failure path.
///
/// Contains the sequence of states and thread actions that led to an
/// invariant violation. Can be rendered as a step-by-thread diagram.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counterexample {
    /// Sequence of state snapshots
    pub states: Vec<StateSnapshot>,
    /// Thread interleaving that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// Memory-lifetime issues detected
    pub memory_issues: Vec<MemoryIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Human-readable description of the failure
    pub description: Option<String>,
}

/// Snapshot of shared state at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    /// Step number in the execution
    pub step: u64,
    /// Description of the state (e.g. `head=N2 in_pop=2 retired=[N1]`)
    pub description: String,
    /// Variable values at this point
    pub variables: Vec<(String, String)>,
}

/// Action taken by a thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadAction {
    /// Thread identifier
    pub thread_id: u64,
    /// Step number when this action occurred
    pub step: u64,
    /// Description of the action (e.g. `pop_cas`, `free(N1)`)
    pub action: String,
    /// Whether this action succeeded (CAS outcome)
    pub success: bool,
}

/// Node-lifetime issue detected.
///
/// Nodes are identified by a stable id (allocation order in a model or
/// harness), never by a raw address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MemoryIssue {
    /// A thread dereferenced a node after it was freed
    UseAfterFree {
        node: u64,
        freed_at_step: u64,
        used_at_step: u64,
    },
    /// A node was freed twice
    DoubleFree { node: u64, step: u64 },
    /// An unlinked node is neither freed, retired, nor owned by a thread
    Leak { node: u64, unlinked_at_step: u64 },
}

impl Counterexample {
    /// Create a new empty counterexample.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counterexample with DST seed for reproduction.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Set the description for this counterexample.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a state snapshot.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    /// Add a thread action.
    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    /// Add a memory issue.
    pub fn add_memory_issue(&mut self, issue: MemoryIssue) {
        self.memory_issues.push(issue);
    }

    /// Render the counterexample as a human-readable thread diagram.
    ///
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0 | Thread 1 | State
    /// -----|----------|----------|------
    ///    1 | pop_enter |          | in_pop=1
    ///    2 |          | pop_enter | in_pop=2
    ///    3 | pop_cas  |          | head=N0
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
            return output;
        }

        output.push_str("Step |");
        for tid in &threads {
            output.push_str(&format!(" Thread {} |", tid));
        }
        output.push_str(" State\n");

        output.push_str("-----|");
        for _ in &threads {
            output.push_str("----------|");
        }
        output.push_str("------\n");

        let max_step = self.interleaving.iter().map(|a| a.step).max().unwrap_or(0);

        for step in 1..=max_step {
            output.push_str(&format!("{:4} |", step));

            for tid in &threads {
                let action = self
                    .interleaving
                    .iter()
                    .find(|a| a.step == step && a.thread_id == *tid);

                match action {
                    Some(a) => {
                        let status = if a.success { "" } else { " [FAIL]" };
                        output.push_str(&format!(" {}{} |", a.action, status));
                    }
                    None => output.push_str("          |"),
                }
            }

            if let Some(state) = self.states.iter().find(|s| s.step == step) {
                output.push_str(&format!(" {}", state.description));
            }

            output.push('\n');
        }

        if !self.memory_issues.is_empty() {
            output.push_str("\nMemory Issues:\n");
            for issue in &self.memory_issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }
}

impl fmt::Display for MemoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIssue::UseAfterFree {
                node,
                freed_at_step,
                used_at_step,
            } => write!(
                f,
                "Use-after-free: node N{} freed at step {}, dereferenced at step {}",
                node, freed_at_step, used_at_step
            ),
            MemoryIssue::DoubleFree { node, step } => {
                write!(f, "Double free: node N{} freed again at step {}", node, step)
            }
            MemoryIssue::Leak {
                node,
                unlinked_at_step,
            } => write!(
                f,
                "Leak: node N{} unlinked at step {}, never freed or retired",
                node, unlinked_at_step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterexample_creation() {
        let ce = Counterexample::new();
        assert!(ce.states.is_empty());
        assert!(ce.interleaving.is_empty());
        assert!(ce.dst_seed.is_none());
    }

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345).with_description("node freed early");
        assert_eq!(ce.dst_seed, Some(12345));
        assert_eq!(ce.description.as_deref(), Some("node freed early"));
    }

    #[test]
    fn test_render_diagram() {
        let mut ce = Counterexample::with_seed(42);

        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 1,
            action: "pop_read_head".to_string(),
            success: true,
        });
        ce.add_action(ThreadAction {
            thread_id: 1,
            step: 2,
            action: "free(N0)".to_string(),
            success: true,
        });
        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 3,
            action: "pop_read_next".to_string(),
            success: false,
        });
        ce.add_state(StateSnapshot {
            step: 2,
            description: "head=None".to_string(),
            variables: vec![],
        });
        ce.add_memory_issue(MemoryIssue::UseAfterFree {
            node: 0,
            freed_at_step: 2,
            used_at_step: 3,
        });

        let diagram = ce.render_diagram();
        assert!(diagram.contains("DST_SEED=42"));
        assert!(diagram.contains("Thread 1"));
        assert!(diagram.contains("free(N0)"));
        assert!(diagram.contains("pop_read_next [FAIL]"));
        assert!(diagram.contains("Use-after-free: node N0"));
    }

    #[test]
    fn test_empty_diagram() {
        let diagram = Counterexample::new().render_diagram();
        assert!(diagram.contains("no thread actions recorded"));
    }

    #[test]
    fn test_serializes_memory_issues() {
        let mut ce = Counterexample::new();
        ce.add_memory_issue(MemoryIssue::DoubleFree { node: 3, step: 9 });

        let json = serde_json::to_string(&ce).unwrap();
        assert!(json.contains("DoubleFree"));
        assert!(json.contains("\"node\":3"));
    }
}
