//! The simulation environment: one seed drives RNG, faults and scheduling.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultStats};
use crate::random::DeterministicRng;
use crate::scheduler::Scheduler;

/// Default probability of a context switch at a yield point.
const YIELD_PROBABILITY_DEFAULT: f64 = 0.2;

/// Everything a simulated run needs, derived from a single seed.
#[derive(Debug)]
pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    clock: SimClock,
    fault: FaultInjector,
    scheduler: Option<Scheduler>,
}

impl DstEnv {
    /// Environment with default fault rates and no scheduler.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        // Sub-streams are offset so that adding a consumer to one of them
        // does not shift the others.
        Self {
            seed,
            rng: DeterministicRng::new(seed),
            clock: SimClock::new(),
            fault: FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config),
            scheduler: None,
        }
    }

    /// Environment with a scheduler over `threads_count` simulated threads.
    #[must_use]
    pub fn with_scheduler(seed: u64, threads_count: usize) -> Self {
        let mut env = Self::new(seed);
        env.scheduler = Some(Scheduler::new(
            DeterministicRng::new(seed.wrapping_add(2)),
            threads_count,
            YIELD_PROBABILITY_DEFAULT,
        ));
        env
    }

    /// Replace the scheduler's yield probability.
    #[must_use]
    pub fn with_yield_probability(mut self, yield_probability: f64) -> Self {
        if let Some(scheduler) = self.scheduler.take() {
            self.scheduler = Some(Scheduler::new(
                DeterministicRng::new(self.seed.wrapping_add(2)),
                scheduler.threads_count(),
                yield_probability,
            ));
        }
        self
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    pub fn scheduler(&mut self) -> Option<&mut Scheduler> {
        self.scheduler.as_mut()
    }

    /// Possibly advance the clock by an injected delay.
    pub fn maybe_delay(&mut self) {
        if let Some(us) = self.fault.maybe_delay_us() {
            self.clock.advance_us(us);
        }
    }

    /// `DST_SEED=<seed>` line for reproduction messages.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.fault.stats()
    }
}
