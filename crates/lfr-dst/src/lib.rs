//! # lfr-dst
//!
//! Deterministic simulation testing for lock-free containers.
//!
//! Time, randomness, faults and thread scheduling are all derived from a
//! single seed, so every failing run can be replayed exactly.
//!
//! ## Pieces
//!
//! - `harness`: simulated threads taking turns, with invariant checks
//! - `fault_injection`: faults at operation boundaries around an
//!   uninstrumented stack
//! - `oracle_scheduler`: replay of step-level interleavings of the
//!   pop/reclaim protocol
//!
//! ## Usage
//!
//! ```rust
//! use lfr_dst::DstEnv;
//!
//! let mut env = DstEnv::new(12345);
//!
//! env.clock().advance_ns(1_000_000);
//! let value: u64 = env.rng().gen();
//! let choice = env.rng().gen_range(0..10);
//! if env.fault().should_fail() {
//!     // simulate failure
//! }
//! # let _ = (value, choice);
//! ```
//!
//! ## Reproducibility
//!
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

pub mod clock;
pub mod env;
pub mod error;
pub mod fault;
pub mod fault_injection;
pub mod harness;
pub mod oracle_scheduler;
pub mod random;
pub mod scheduler;

use tracing::warn;

pub use clock::SimClock;
pub use env::DstEnv;
pub use error::DstError;
pub use fault::{FaultConfig, FaultInjector, FaultStats};
pub use fault_injection::{
    random_ops, run_dst_scenario, DstOp, DstResult, DstRunner, DstStats, DstTestableStack,
    FaultPoint, FaultType,
};
pub use harness::{parse_positive_env, DstHarness, HarnessConfig, HarnessResult};
pub use oracle_scheduler::{
    OracleActionType, OracleScheduler, OracleSchedulerStats, OracleStep, OracleTrace,
};
pub use random::DeterministicRng;
pub use scheduler::{ScheduleDecision, Scheduler};

/// Environment variable holding a seed to replay.
pub const SEED_ENV: &str = "DST_SEED";

/// Parse a seed string. Zero is rejected.
pub fn parse_seed(raw: &str) -> error::Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(seed) if seed != 0 => Ok(seed),
        _ => Err(DstError::InvalidSeed {
            value: raw.to_string(),
        }),
    }
}

/// Get DST seed from environment or generate random one.
///
/// Prints the seed for reproduction. Use `DST_SEED=<seed>` to reproduce.
/// An unparsable `DST_SEED` is reported and replaced by a random seed.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    if let Ok(raw) = std::env::var(SEED_ENV) {
        match parse_seed(&raw) {
            Ok(seed) => {
                println!("DST_SEED={} (from environment)", seed);
                return seed;
            }
            Err(e) => warn!(error = %e, "ignoring DST_SEED"),
        }
    }

    let seed = rand::random::<u64>().max(1);
    println!("DST_SEED={} (randomly generated)", seed);
    seed
}
