//! # lfr-core
//!
//! Core types and invariants for lock-free containers with deferred
//! reclamation.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - Invariant traits per concern: `StackProperties` for element
//!   conservation and LIFO order, `ReclamationProperties` for node lifetime

pub mod counterexample;
pub mod invariants;
pub mod property;

pub use counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
pub use invariants::{
    ReclamationProperties, ReclamationPropertyChecker, StackHistory, StackOperation,
    StackProperties, StackPropertyChecker,
};
pub use property::{PropertyChecker, PropertyResult};
