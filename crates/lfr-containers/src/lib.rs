//! # lfr-containers
//!
//! A lock-free stack that reclaims popped nodes by counting pops in
//! progress, with the structures it is measured against.
//!
//! # Stacks
//!
//! - `reclaiming_stack`: the pop-counting stack with a deferred retirement list
//! - `baseline_stacks`: the leaking and free-on-unlink variants it corrects
//! - `epoch_stack`: the same Treiber stack reclaimed by crossbeam-epoch
//! - `tracked`: history-recording wrapper for the `lfr-core` checkers and DST
//! - `kani_proofs`: bounded proofs of sequential behavior (under `#[cfg(kani)]`)
//!
//! # Comparison containers
//!
//! - `spsc_queue`: single-producer single-consumer linked queue
//! - `two_lock_queue`: MPMC queue with separate head and tail locks
//! - `sharded_map`: hash map with one `RwLock` per bucket
//!
//! Loom tests for the reclaiming stack run with `RUSTFLAGS="--cfg loom"`.

pub mod baseline_stacks;
pub mod epoch_stack;
pub mod kani_proofs;
pub mod reclaiming_stack;
pub mod sharded_map;
pub mod spsc_queue;
mod sync;
pub mod tracked;
pub mod two_lock_queue;

pub use baseline_stacks::{ImmediateFreeStack, LeakingStack};
pub use epoch_stack::EpochStack;
pub use reclaiming_stack::{ReclaimingStack, StackConfig, StackStats};
pub use sharded_map::ShardedMap;
pub use spsc_queue::{Consumer, Producer, SpscQueue};
pub use tracked::{TrackedStack, COUNTED_RECLAMATION_PROPERTIES};
pub use two_lock_queue::TwoLockQueue;
