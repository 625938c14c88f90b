//! Runs the model checker and turns its discoveries into property results.

use std::time::{Duration, Instant};

use lfr_core::{Counterexample, PropertyResult, StateSnapshot, ThreadAction};
use stateright::{Checker, Model, Path};
use tracing::debug;

use crate::model::{ModelConfig, ReclaimAction, ReclaimModel, ReclaimState, Step, Variant};

/// Name of each `always` property, in declaration order.
pub const SAFETY_PROPERTIES: [&str; 6] = [
    "no use after free",
    "no double free",
    "no leak",
    "reclamation invariants",
    "stack invariants",
    "counter balanced when finished",
];

/// Name of each `sometimes` property.
pub const REACHABILITY_PROPERTIES: [&str; 2] = ["retired batch freed", "taken batch re-chained"];

/// Outcome of exhaustively checking one configuration.
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub variant: Variant,
    pub state_count: usize,
    pub duration: Duration,
    /// One result per property. `always` properties fail on a
    /// counterexample; `sometimes` properties fail when unreachable.
    pub results: Vec<PropertyResult>,
}

impl ModelReport {
    /// Result for a property by name.
    #[must_use]
    pub fn result(&self, name: &str) -> Option<&PropertyResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// True if every safety property holds.
    #[must_use]
    pub fn safe(&self) -> bool {
        SAFETY_PROPERTIES
            .iter()
            .all(|name| self.result(name).map_or(false, |r| r.holds))
    }

    #[must_use]
    pub fn format(&self) -> String {
        let mut out = format!(
            "{:?}: {} states in {:?}\n",
            self.variant, self.state_count, self.duration
        );
        for result in &self.results {
            out.push_str("  ");
            out.push_str(&result.format_status());
            out.push('\n');
        }
        out
    }
}

/// Exhaustively check `config` with breadth-first search.
#[must_use]
pub fn check_model(config: ModelConfig) -> ModelReport {
    let variant = config.variant;
    let model = ReclaimModel::new(config);
    let start = Instant::now();
    let checker = model.clone().checker().spawn_bfs().join();
    let duration = start.elapsed();

    let mut results = Vec::with_capacity(SAFETY_PROPERTIES.len() + REACHABILITY_PROPERTIES.len());
    for name in SAFETY_PROPERTIES {
        results.push(match checker.discovery(name) {
            Some(path) => {
                let ce = path_counterexample(&model, path, name);
                let violation = format!("counterexample in {} steps", ce.interleaving.len());
                PropertyResult::fail(name, violation, Some(ce))
            }
            None => PropertyResult::pass(name),
        });
    }
    for name in REACHABILITY_PROPERTIES {
        results.push(match checker.discovery(name) {
            Some(_) => PropertyResult::pass(name),
            None => PropertyResult::fail(name, "never reached", None),
        });
    }

    let report = ModelReport {
        variant,
        state_count: checker.unique_state_count(),
        duration,
        results,
    };
    debug!(
        ?variant,
        states = report.state_count,
        safe = report.safe(),
        "model check finished"
    );
    report
}

/// Render a checker path as a counterexample diagram.
#[must_use]
pub fn path_counterexample(
    model: &ReclaimModel,
    path: Path<ReclaimState, ReclaimAction>,
    property: &str,
) -> Counterexample {
    let mut ce = Counterexample::new().with_description(format!(
        "{:?} variant violates '{}'",
        model.config.variant, property
    ));

    let mut state = model.initial_state();
    for (i, action) in path.into_actions().into_iter().enumerate() {
        let step = i as u64 + 1;
        let before = state.clone();
        let Some(next) = model.apply(&state, action.thread) else {
            break;
        };
        ce.add_action(ThreadAction {
            thread_id: action.thread as u64,
            step,
            action: step_label(action.step),
            success: cas_succeeded(&before, &next, action),
        });
        ce.add_state(StateSnapshot {
            step,
            description: describe(&next),
            variables: vec![
                ("threads_in_pop".to_string(), next.threads_in_pop.to_string()),
                ("retired".to_string(), format!("{:?}", next.retired)),
            ],
        });
        state = next;
    }
    ce
}

fn cas_succeeded(before: &ReclaimState, after: &ReclaimState, action: ReclaimAction) -> bool {
    match action.step {
        Step::PushCas | Step::PopCas => before.head != after.head,
        _ => true,
    }
}

fn step_label(step: Step) -> String {
    match step {
        Step::PushAlloc(v) => format!("push_alloc({})", v),
        other => crate::oracle::action_type(other).label().to_string(),
    }
}

fn describe(state: &ReclaimState) -> String {
    let head = match state.head {
        Some(id) => format!("N{}", id),
        None => "-".to_string(),
    };
    format!(
        "head={} in_pop={} retired={:?}",
        head, state.threads_in_pop, state.retired
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reclaiming_is_safe_and_reaches_deferral() {
        let report = check_model(ModelConfig::contended_pops(Variant::Reclaiming));
        assert!(report.safe(), "{}", report.format());
        assert!(report.result("retired batch freed").unwrap().holds);
        assert!(report.result("taken batch re-chained").unwrap().holds);
        assert!(report.state_count > 100);
    }

    #[test]
    fn test_free_on_unlink_counterexample_renders() {
        let report = check_model(ModelConfig::contended_pops(Variant::FreeOnUnlink));
        let uaf = report.result("no use after free").unwrap();
        assert!(!uaf.holds);

        let diagram = uaf.counterexample.as_ref().unwrap().render_diagram();
        assert!(diagram.contains("free_own"));
        assert!(diagram.contains("pop_read_next"));
    }
}
