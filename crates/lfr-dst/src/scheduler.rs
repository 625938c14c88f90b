//! Deterministic thread scheduling.
//!
//! Simulated threads run one at a time. At every yield point the scheduler
//! decides, from its seeded RNG, whether the current thread keeps running
//! or another one takes over.

use crate::random::DeterministicRng;

/// Outcome of a yield point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Keep running the current thread
    Continue,
    /// Switch to the given thread
    SwitchTo(usize),
}

/// Seeded scheduler over `threads_count` simulated threads.
#[derive(Debug, Clone)]
pub struct Scheduler {
    rng: DeterministicRng,
    threads_count: usize,
    yield_probability: f64,
    current: usize,
    switches_count: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new(rng: DeterministicRng, threads_count: usize, yield_probability: f64) -> Self {
        debug_assert!(threads_count > 0, "Scheduler needs at least one thread");
        debug_assert!(
            (0.0..=1.0).contains(&yield_probability),
            "yield probability out of range"
        );

        Self {
            rng,
            threads_count,
            yield_probability,
            current: 0,
            switches_count: 0,
        }
    }

    /// Thread currently scheduled.
    #[must_use]
    pub fn current_thread(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn threads_count(&self) -> usize {
        self.threads_count
    }

    #[must_use]
    pub fn switches_count(&self) -> u64 {
        self.switches_count
    }

    /// Yield point.
    pub fn decide(&mut self) -> ScheduleDecision {
        if self.threads_count < 2 || !self.rng.gen_bool(self.yield_probability) {
            return ScheduleDecision::Continue;
        }
        let next = self.pick_other();
        self.switch_to(next);
        ScheduleDecision::SwitchTo(next)
    }

    /// Switch away from the current thread unconditionally (used when it
    /// has finished its work).
    pub fn force_switch(&mut self) -> ScheduleDecision {
        if self.threads_count < 2 {
            return ScheduleDecision::Continue;
        }
        let next = self.pick_other();
        self.switch_to(next);
        ScheduleDecision::SwitchTo(next)
    }

    /// Make `thread` current.
    pub fn switch_to(&mut self, thread: usize) {
        debug_assert!(thread < self.threads_count, "thread {} out of range", thread);
        if thread != self.current {
            self.switches_count += 1;
        }
        self.current = thread;
    }

    fn pick_other(&mut self) -> usize {
        let offset = self.rng.gen_range(1..self.threads_count);
        (self.current + offset) % self.threads_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_thread_never_switches() {
        let mut scheduler = Scheduler::new(DeterministicRng::new(1), 1, 1.0);
        for _ in 0..100 {
            assert_eq!(scheduler.decide(), ScheduleDecision::Continue);
        }
        assert_eq!(scheduler.force_switch(), ScheduleDecision::Continue);
    }

    #[test]
    fn test_force_switch_changes_thread() {
        let mut scheduler = Scheduler::new(DeterministicRng::new(3), 4, 0.0);
        for _ in 0..50 {
            let before = scheduler.current_thread();
            match scheduler.force_switch() {
                ScheduleDecision::SwitchTo(next) => assert_ne!(next, before),
                ScheduleDecision::Continue => panic!("expected a switch"),
            }
        }
        assert_eq!(scheduler.switches_count(), 50);
    }

    #[test]
    fn test_schedule_is_reproducible() {
        let run = || {
            let mut scheduler = Scheduler::new(DeterministicRng::new(11), 3, 0.5);
            (0..100)
                .map(|_| {
                    scheduler.decide();
                    scheduler.current_thread()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
