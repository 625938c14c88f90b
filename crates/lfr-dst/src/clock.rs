//! Simulated time.

/// Monotonic simulated clock. Time only moves when advanced.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ns: u64,
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time in nanoseconds.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Advance time by `delta` nanoseconds.
    pub fn advance_ns(&mut self, delta: u64) {
        self.now_ns = self.now_ns.saturating_add(delta);
    }

    /// Advance time by `delta` microseconds.
    pub fn advance_us(&mut self, delta: u64) {
        self.advance_ns(delta.saturating_mul(1_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let mut clock = SimClock::new();
        assert_eq!(clock.now_ns(), 0);

        clock.advance_ns(500);
        clock.advance_us(2);
        assert_eq!(clock.now_ns(), 2_500);
    }

    #[test]
    fn test_clock_saturates() {
        let mut clock = SimClock::new();
        clock.advance_ns(u64::MAX);
        clock.advance_us(1);
        assert_eq!(clock.now_ns(), u64::MAX);
    }
}
