//! Probabilistic fault injection.

use crate::random::DeterministicRng;

/// How often faults fire.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Probability that `should_fail` returns true
    pub failure_probability: f64,
    /// Probability that `maybe_delay` advances the clock
    pub delay_probability: f64,
    /// Upper bound for a single injected delay, in microseconds
    pub delay_us_max: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            failure_probability: 0.01,
            delay_probability: 0.05,
            delay_us_max: 100,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            failure_probability: 0.0,
            delay_probability: 0.0,
            delay_us_max: 0,
        }
    }

    /// High fault rates for stress runs.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_probability: 0.1,
            delay_probability: 0.3,
            delay_us_max: 1_000,
        }
    }
}

/// Counters for injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub checks_count: u64,
    pub faults_count: u64,
    pub delays_count: u64,
}

/// Decides, deterministically, when to inject a fault.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    /// Roll for a failure.
    pub fn should_fail(&mut self) -> bool {
        self.stats.checks_count += 1;
        let p = self.config.failure_probability;
        if p > 0.0 && self.rng.gen_bool(p.min(1.0)) {
            self.stats.faults_count += 1;
            return true;
        }
        false
    }

    /// Roll for a delay; returns the delay in microseconds if one fires.
    pub fn maybe_delay_us(&mut self) -> Option<u64> {
        let p = self.config.delay_probability;
        if p <= 0.0 || self.config.delay_us_max == 0 || !self.rng.gen_bool(p.min(1.0)) {
            return None;
        }
        self.stats.delays_count += 1;
        Some(self.rng.gen_range(1..=self.config.delay_us_max))
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
