//! DST harness for reproducible simulated-concurrency runs.
//!
//! Simulated threads take turns according to the seeded scheduler. Each
//! turn executes one operation against the structure under test; invariants
//! are checked every `invariant_check_interval` operations and once at the
//! end. The first violation stops the run.

use tracing::debug;

use crate::error::{DstError, Result};
use crate::{DstEnv, FaultConfig, ScheduleDecision};

/// Environment variable overriding `operations_per_thread`.
pub const ITERATIONS_ENV: &str = "DST_ITERATIONS";

/// Configuration for the DST harness.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Number of threads to simulate
    pub threads_count: usize,
    /// Number of operations per thread
    pub operations_per_thread: u64,
    /// Probability of context switch at yield points
    pub yield_probability: f64,
    /// Fault injection configuration
    pub fault_config: FaultConfig,
    /// Check invariants after every N operations (0 = only at the end)
    pub invariant_check_interval: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threads_count: 4,
            operations_per_thread: 100,
            yield_probability: 0.2,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 10,
        }
    }
}

impl HarnessConfig {
    /// Configuration for stress testing.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            threads_count: 8,
            operations_per_thread: 1000,
            yield_probability: 0.3,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 100,
        }
    }

    /// Configuration for quick testing.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            threads_count: 2,
            operations_per_thread: 50,
            yield_probability: 0.1,
            fault_config: FaultConfig::none(),
            invariant_check_interval: 10,
        }
    }

    /// Default configuration with `DST_ITERATIONS` applied, if set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(ops) = parse_positive_env(ITERATIONS_ENV)? {
            config.operations_per_thread = ops;
        }
        Ok(config)
    }
}

/// Read a positive integer from an environment variable.
///
/// Returns `Ok(None)` when the variable is unset.
pub fn parse_positive_env(var: &'static str) -> Result<Option<u64>> {
    match std::env::var(var) {
        Ok(raw) => parse_positive(var, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(DstError::InvalidIterations {
            var,
            value: raw.to_string(),
        }),
    }
}

/// Result of running the harness.
#[derive(Debug, Clone)]
pub struct HarnessResult {
    /// Seed used for reproduction
    pub seed: u64,
    /// Total operations executed
    pub operations_count: u64,
    /// Context switches that occurred
    pub context_switches_count: u64,
    /// Faults injected
    pub faults_injected_count: u64,
    /// Invariant checks performed
    pub invariant_checks_count: u64,
    /// Whether all invariants held
    pub all_invariants_held: bool,
    /// First violation (if any)
    pub first_violation: Option<String>,
}

/// DST harness.
///
/// Given the same seed and config, the same interleaving is produced.
pub struct DstHarness {
    env: DstEnv,
    config: HarnessConfig,
    operations_count: u64,
    context_switches_count: u64,
    invariant_checks_count: u64,
    violation: Option<String>,
}

impl DstHarness {
    /// Create a new harness with the given seed and config.
    #[must_use]
    pub fn new(seed: u64, config: HarnessConfig) -> Self {
        debug_assert!(seed != 0, "Seed should not be zero");
        debug_assert!(config.threads_count > 0, "Must have at least one thread");
        debug_assert!(
            config.threads_count <= 16,
            "Too many threads for DST: {}",
            config.threads_count
        );

        let mut env = DstEnv::with_scheduler(seed, config.threads_count)
            .with_yield_probability(config.yield_probability);
        *env.fault() = crate::FaultInjector::new(
            crate::DeterministicRng::new(seed.wrapping_add(1)),
            config.fault_config.clone(),
        );

        Self {
            env,
            config,
            operations_count: 0,
            context_switches_count: 0,
            invariant_checks_count: 0,
            violation: None,
        }
    }

    /// Get the seed for reproduction.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    /// Get the environment for custom operations.
    pub fn env(&mut self) -> &mut DstEnv {
        &mut self.env
    }

    /// Check if the harness has been stopped due to a violation.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.violation.is_some()
    }

    /// Stop the harness with a violation message. Only the first one is kept.
    pub fn stop_with_violation(&mut self, message: String) {
        if self.violation.is_none() {
            debug!(seed = self.env.seed(), %message, "DST run stopped");
            self.violation = Some(message);
        }
    }

    /// Yield point - potentially switch to another thread.
    pub fn yield_point(&mut self) -> ScheduleDecision {
        let decision = match self.env.scheduler() {
            Some(scheduler) => scheduler.decide(),
            None => ScheduleDecision::Continue,
        };
        if decision != ScheduleDecision::Continue {
            self.context_switches_count += 1;
        }
        decision
    }

    /// Get the current thread ID.
    pub fn current_thread(&mut self) -> usize {
        self.env.scheduler().map_or(0, |s| s.current_thread())
    }

    fn should_check_invariants(&self) -> bool {
        let interval = self.config.invariant_check_interval;
        interval != 0 && self.operations_count % interval == 0
    }

    /// Run a single-threaded test.
    ///
    /// The generator receives the current step and returns an operation, or
    /// `None` to skip the step.
    pub fn run_single_threaded<F, T, R>(&mut self, mut generate_op: F, mut execute: R) -> HarnessResult
    where
        F: FnMut(&mut DstEnv, u64) -> Option<T>,
        R: FnMut(&mut DstEnv, T) -> std::result::Result<(), String>,
    {
        for step in 0..self.config.operations_per_thread {
            if self.is_stopped() {
                break;
            }
            if let Some(op) = generate_op(&mut self.env, step) {
                if let Err(e) = execute(&mut self.env, op) {
                    self.stop_with_violation(e);
                    break;
                }
                self.operations_count += 1;
            }
            self.env.maybe_delay();
        }

        self.build_result()
    }

    /// Run a simulated concurrent test.
    ///
    /// Operations are interleaved according to the scheduler.
    pub fn run_concurrent<F, T, R, I>(
        &mut self,
        mut generate_op: F,
        mut execute: R,
        mut check_invariants: I,
    ) -> HarnessResult
    where
        F: FnMut(&mut DstEnv, usize, u64) -> Option<T>,
        R: FnMut(&mut DstEnv, usize, T) -> std::result::Result<(), String>,
        I: FnMut() -> std::result::Result<(), String>,
    {
        let threads_count = self.config.threads_count;
        let ops_per_thread = self.config.operations_per_thread;
        let mut thread_steps: Vec<u64> = vec![0; threads_count];

        while !self.is_stopped() {
            let current = self.current_thread();

            if thread_steps[current] >= ops_per_thread {
                if thread_steps.iter().all(|&s| s >= ops_per_thread) {
                    break;
                }
                if let Some(scheduler) = self.env.scheduler() {
                    scheduler.force_switch();
                }
                self.context_switches_count += 1;
                continue;
            }

            if let Some(op) = generate_op(&mut self.env, current, thread_steps[current]) {
                if let Err(e) = execute(&mut self.env, current, op) {
                    self.stop_with_violation(format!("Thread {}: {}", current, e));
                    break;
                }
                self.operations_count += 1;
            }
            thread_steps[current] += 1;

            if self.should_check_invariants() {
                self.invariant_checks_count += 1;
                if let Err(e) = check_invariants() {
                    self.stop_with_violation(e);
                    break;
                }
            }

            self.yield_point();
        }

        if !self.is_stopped() {
            self.invariant_checks_count += 1;
            if let Err(e) = check_invariants() {
                self.stop_with_violation(e);
            }
        }

        self.build_result()
    }

    fn build_result(&mut self) -> HarnessResult {
        HarnessResult {
            seed: self.env.seed(),
            operations_count: self.operations_count,
            context_switches_count: self.context_switches_count,
            faults_injected_count: self.env.fault().stats().faults_count,
            invariant_checks_count: self.invariant_checks_count,
            all_invariants_held: self.violation.is_none(),
            first_violation: self.violation.clone(),
        }
    }
}

impl HarnessResult {
    /// Format for display.
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.all_invariants_held {
            "PASS"
        } else {
            "FAIL"
        };

        let mut result = format!(
            "[{}] DST_SEED={} ops={} switches={} faults={} checks={}",
            status,
            self.seed,
            self.operations_count,
            self.context_switches_count,
            self.faults_injected_count,
            self.invariant_checks_count
        );

        if let Some(ref violation) = self.first_violation {
            result.push_str(&format!("\n  Violation: {}", violation));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_single_threaded() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick());
        let mut counter = 0u64;

        let result = harness.run_single_threaded(
            |_env, step| if step < 10 { Some(step) } else { None },
            |_env, op| {
                counter += op;
                Ok(())
            },
        );

        assert!(result.all_invariants_held);
        assert_eq!(result.operations_count, 10);
        assert_eq!(counter, 45);
    }

    #[test]
    fn test_harness_stops_on_violation() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick());

        let result = harness.run_single_threaded(
            |_env, step| Some(step),
            |_env, op| {
                if op == 5 {
                    Err("retired node freed twice".to_string())
                } else {
                    Ok(())
                }
            },
        );

        assert!(!result.all_invariants_held);
        assert_eq!(result.operations_count, 5);
        assert!(result.format().contains("retired node freed twice"));
    }

    #[test]
    fn test_harness_concurrent() {
        let config = HarnessConfig {
            threads_count: 2,
            operations_per_thread: 10,
            yield_probability: 0.5,
            invariant_check_interval: 5,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(12345, config);
        let mut thread_counters = vec![0u64; 2];
        let mut checks = 0;

        let result = harness.run_concurrent(
            |_env, _thread, step| Some(step),
            |_env, thread, _op| {
                thread_counters[thread] += 1;
                Ok(())
            },
            || {
                checks += 1;
                Ok(())
            },
        );

        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(thread_counters, vec![10, 10]);
        assert!(result.context_switches_count > 0);
        assert_eq!(result.invariant_checks_count, checks);
    }

    #[test]
    fn test_concurrent_final_check_reports_violation() {
        let mut harness = DstHarness::new(7, HarnessConfig::quick());

        let result = harness.run_concurrent(
            |_env, _thread, step| Some(step),
            |_env, _thread, _op| Ok(()),
            || Err("retirement list not drained".to_string()),
        );

        assert!(!result.all_invariants_held);
        assert_eq!(
            result.first_violation.as_deref(),
            Some("retirement list not drained")
        );
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive(ITERATIONS_ENV, "250"), Ok(250));
        assert_eq!(
            parse_positive(ITERATIONS_ENV, "0"),
            Err(DstError::InvalidIterations {
                var: ITERATIONS_ENV,
                value: "0".to_string()
            })
        );
        assert!(parse_positive(ITERATIONS_ENV, "many").is_err());
    }
}
