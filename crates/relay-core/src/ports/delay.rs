//! DelayStrategy port - simulated processing latency.

use std::time::Duration;

use rand::Rng;

/// Draws the latency of one simulated unit of work.
pub trait DelayStrategy: Send + Sync {
    fn next_delay(&self) -> Duration;
}

/// Uniformly distributed delay in `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct UniformDelay {
    min: Duration,
    max: Duration,
}

impl UniformDelay {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }
}

impl Default for UniformDelay {
    /// 500–1500 ms.
    fn default() -> Self {
        Self::from_millis(500, 1500)
    }
}

impl DelayStrategy for UniformDelay {
    fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let ms = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }
}

/// Always the same delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay(pub Duration);

impl DelayStrategy for FixedDelay {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_delay_stays_within_bounds() {
        let delay = UniformDelay::default();
        for _ in 0..1_000 {
            let d = delay.next_delay();
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn inverted_bounds_are_normalized() {
        let delay = UniformDelay::from_millis(900, 100);
        for _ in 0..100 {
            let d = delay.next_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(900));
        }
    }

    #[test]
    fn degenerate_range_is_constant() {
        let delay = UniformDelay::from_millis(250, 250);
        assert_eq!(delay.next_delay(), Duration::from_millis(250));
        assert_eq!(FixedDelay(Duration::from_millis(5)).next_delay(), Duration::from_millis(5));
    }
}
