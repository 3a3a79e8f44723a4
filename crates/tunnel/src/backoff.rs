//! Reconnect delay state.

use std::time::Duration;

/// Doubling reconnect delay bounded by `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Starts at `min`. A `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Back to the minimum after a stable run.
    pub fn reset(&mut self) -> Duration {
        self.current = self.min;
        self.current
    }

    /// Doubles the delay, capped at the maximum.
    pub fn grow(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).clamp(self.min, self.max);
        self.current
    }

    /// Jumps straight to the maximum.
    pub fn saturate(&mut self) -> Duration {
        self.current = self.max;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn grows_by_doubling_up_to_max() {
        let mut b = Backoff::new(ms(500), ms(3000));
        assert_eq!(b.current(), ms(500));
        assert_eq!(b.grow(), ms(1000));
        assert_eq!(b.grow(), ms(2000));
        assert_eq!(b.grow(), ms(3000));
        assert_eq!(b.grow(), ms(3000));
    }

    #[test]
    fn reset_returns_to_min() {
        let mut b = Backoff::new(ms(500), ms(3000));
        b.grow();
        b.grow();
        assert_eq!(b.reset(), ms(500));
    }

    #[test]
    fn saturate_jumps_to_max() {
        let mut b = Backoff::new(ms(500), ms(30_000));
        assert_eq!(b.saturate(), ms(30_000));
        assert_eq!(b.grow(), ms(30_000));
    }

    #[test]
    fn zero_min_only_leaves_zero_when_saturated() {
        let mut b = Backoff::new(Duration::ZERO, ms(100));
        assert_eq!(b.grow(), Duration::ZERO);
        assert_eq!(b.saturate(), ms(100));
    }

    #[test]
    fn inverted_bounds_collapse_to_min() {
        let b = Backoff::new(ms(500), ms(100));
        assert_eq!(b.max(), ms(500));
    }
}
