//! # lfr-model
//!
//! Exhaustive stateright model of the pop-counting reclamation protocol.
//!
//! Every atomic step of `push`, `pop` and the reclaim decision is a model
//! action, so breadth-first search covers every interleaving of a bounded
//! configuration.
//!
//! ## Usage
//!
//! 1. Model checking:
//!    ```ignore
//!    use lfr_model::{check_model, ModelConfig, Variant};
//!    let report = check_model(ModelConfig::contended_pops(Variant::Reclaiming));
//!    assert!(report.safe());
//!    ```
//!
//! 2. Oracle extraction for DST:
//!    ```ignore
//!    use lfr_model::{ModelConfig, OracleExtractor, Variant};
//!    let oracles = OracleExtractor::new().extract(&ModelConfig::contended_pops(Variant::Reclaiming));
//!    ```
//!
//! ## Modules
//!
//! - `model`: state machine and properties
//! - `verifier`: checker runs as `PropertyResult`s with counterexamples
//! - `oracle`: discoveries as replayable DST traces

pub mod model;
pub mod oracle;
pub mod verifier;

pub use model::{
    ModelConfig, ModelOp, NodeId, Pc, ReclaimAction, ReclaimModel, ReclaimState, Step, Variant,
};
pub use oracle::{action_type, Oracle, OracleCategory, OracleExtractor};
pub use verifier::{check_model, ModelReport, REACHABILITY_PROPERTIES, SAFETY_PROPERTIES};
