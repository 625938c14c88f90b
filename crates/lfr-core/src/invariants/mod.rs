//! Invariant traits for lock-free containers.
//!
//! - `stack`: element conservation (NoLostElements, NoDuplicates,
//!   PoppedWerePushed, AtMostOncePop) and LIFO order
//! - `reclamation`: node lifetime under deferred reclamation
//!   (NoUseAfterFree, NoDoubleFree, NodeAccounting, QuiescentDrain)

pub mod reclamation;
pub mod stack;

pub use reclamation::{ReclamationProperties, ReclamationPropertyChecker};
pub use stack::{StackHistory, StackOpType, StackOperation, StackProperties, StackPropertyChecker};
