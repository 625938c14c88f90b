//! Oracle extraction from model checking.
//!
//! Every discovery the checker makes is a concrete interleaving. Those
//! interleavings become DST oracle traces: the reclaiming variant yields
//! traces that exercise deferral and re-chaining, the baselines yield the
//! traces that break them.

use std::collections::BTreeMap;

use lfr_dst::{OracleActionType, OracleTrace};
use stateright::{Checker, Model};
use tracing::debug;

use crate::model::{ModelConfig, ReclaimModel, Step, Variant};

/// Categories of oracles for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OracleCategory {
    /// A retired batch is freed by the last popper out
    DeferredFree,
    /// A taken batch goes back on the retirement list
    BatchRechain,
    /// Free-on-unlink dereferences a freed node
    UseAfterFree,
    /// Leaking stack drops an unlinked node
    Leak,
}

impl OracleCategory {
    /// Property whose discovery produces this category, and the variant it
    /// is checked under.
    #[must_use]
    pub fn source(self) -> (&'static str, Variant) {
        match self {
            Self::DeferredFree => ("retired batch freed", Variant::Reclaiming),
            Self::BatchRechain => ("taken batch re-chained", Variant::Reclaiming),
            Self::UseAfterFree => ("no use after free", Variant::FreeOnUnlink),
            Self::Leak => ("no leak", Variant::Leaking),
        }
    }

    pub const ALL: [OracleCategory; 4] = [
        Self::DeferredFree,
        Self::BatchRechain,
        Self::UseAfterFree,
        Self::Leak,
    ];
}

/// An interleaving worth replaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oracle {
    pub category: OracleCategory,
    /// Variant the trace was found under
    pub variant: Variant,
    /// Configuration the trace replays against
    pub config: ModelConfig,
    pub trace: OracleTrace,
}

impl Oracle {
    /// Human-readable listing.
    #[must_use]
    pub fn format_trace(&self) -> String {
        format!("[{:?}] {}", self.category, self.trace.format_trace())
    }
}

/// Map a model step onto the DST action vocabulary.
#[must_use]
pub fn action_type(step: Step) -> OracleActionType {
    match step {
        Step::PushAlloc(_) => OracleActionType::PushAlloc,
        Step::PushReadHead => OracleActionType::PushReadHead,
        Step::PushCas => OracleActionType::PushCas,
        Step::PopEnter => OracleActionType::PopEnter,
        Step::PopReadHead => OracleActionType::PopReadHead,
        Step::PopReadNext => OracleActionType::PopReadNext,
        Step::PopCas => OracleActionType::PopCas,
        Step::ReclaimCheck => OracleActionType::ReclaimCheck,
        Step::TakeRetired => OracleActionType::TakeRetired,
        Step::Decrement => OracleActionType::Decrement,
        Step::FreeTaken => OracleActionType::FreeTaken,
        Step::ChainTaken => OracleActionType::ChainTaken,
        Step::FreeOwn => OracleActionType::FreeOwn,
        Step::ChainOwn => OracleActionType::ChainOwn,
        Step::DecrementAfterChain => OracleActionType::DecrementAfterChain,
    }
}

/// Runs the checker per variant and collects oracles.
pub struct OracleExtractor {
    oracles: Vec<Oracle>,
    oracles_per_category_max: usize,
    category_counts: BTreeMap<OracleCategory, usize>,
}

impl OracleExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            oracles: Vec::new(),
            oracles_per_category_max: 10,
            category_counts: BTreeMap::new(),
        }
    }

    /// Set maximum oracles per category.
    #[must_use]
    pub fn with_max_per_category(mut self, max: usize) -> Self {
        self.oracles_per_category_max = max;
        self
    }

    /// Check `base` under every variant and keep one oracle per discovery.
    ///
    /// `base.variant` is ignored; each category picks its own.
    pub fn extract(&mut self, base: &ModelConfig) -> Vec<Oracle> {
        for category in OracleCategory::ALL {
            if !self.should_add(category) {
                continue;
            }
            let (property, variant) = category.source();
            let config = ModelConfig {
                variant,
                ..base.clone()
            };
            let checker = ReclaimModel::new(config.clone()).checker().spawn_bfs().join();

            let Some(path) = checker.discovery(property) else {
                debug!(?category, "no discovery");
                continue;
            };

            let mut trace = OracleTrace::new(format!("{:?}", category).to_lowercase())
                .with_description(format!("{:?} variant reaching '{}'", variant, property));
            for action in path.into_actions() {
                let value = match action.step {
                    Step::PushAlloc(v) => Some(v),
                    _ => None,
                };
                trace.add_step(action.thread, action_type(action.step), value);
            }

            self.add_oracle(Oracle {
                category,
                variant,
                config,
                trace,
            });
        }

        self.oracles.clone()
    }

    fn should_add(&self, category: OracleCategory) -> bool {
        self.category_counts.get(&category).copied().unwrap_or(0) < self.oracles_per_category_max
    }

    fn add_oracle(&mut self, oracle: Oracle) {
        let count = self.category_counts.entry(oracle.category).or_insert(0);
        if *count < self.oracles_per_category_max {
            *count += 1;
            self.oracles.push(oracle);
        }
    }

    /// Get all extracted oracles.
    #[must_use]
    pub fn oracles(&self) -> &[Oracle] {
        &self.oracles
    }

    /// Get oracles by category.
    #[must_use]
    pub fn oracles_by_category(&self, category: OracleCategory) -> Vec<&Oracle> {
        self.oracles
            .iter()
            .filter(|o| o.category == category)
            .collect()
    }
}

impl Default for OracleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_all_categories() {
        let mut extractor = OracleExtractor::new();
        let oracles = extractor.extract(&ModelConfig::contended_pops(Variant::Reclaiming));

        assert_eq!(oracles.len(), OracleCategory::ALL.len());
        for category in OracleCategory::ALL {
            assert_eq!(extractor.oracles_by_category(category).len(), 1, "{:?}", category);
        }
    }

    #[test]
    fn test_use_after_free_oracle_ends_in_dereference() {
        let mut extractor = OracleExtractor::new();
        extractor.extract(&ModelConfig::contended_pops(Variant::Reclaiming));

        let uaf = extractor.oracles_by_category(OracleCategory::UseAfterFree)[0];
        assert_eq!(uaf.variant, Variant::FreeOnUnlink);
        let last = uaf.trace.steps.last().unwrap();
        assert_eq!(last.action_type, OracleActionType::PopReadNext);
        assert!(uaf.trace.count(OracleActionType::FreeOwn) >= 1);
    }

    #[test]
    fn test_rechain_oracle_contains_rechain() {
        let mut extractor = OracleExtractor::new();
        extractor.extract(&ModelConfig::contended_pops(Variant::Reclaiming));

        let rechain = extractor.oracles_by_category(OracleCategory::BatchRechain)[0];
        assert_eq!(rechain.trace.steps.last().unwrap().action_type, OracleActionType::ChainTaken);
        assert!(rechain.format_trace().contains("chain_taken"));
    }

    #[test]
    fn test_max_per_category() {
        let mut extractor = OracleExtractor::new().with_max_per_category(0);
        assert!(extractor
            .extract(&ModelConfig::contended_pops(Variant::Reclaiming))
            .is_empty());
    }
}
