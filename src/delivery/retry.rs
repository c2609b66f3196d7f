use std::time::Duration;

/// Doubling delays between `min` and `max`.
///
/// An infinite iterator: the delay saturates at `max` and stays there until [`reset`] is called.
///
/// [`reset`]: ExponentialBackoff::reset
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_max() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<_> = backoff.by_ref().take(5).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);

        backoff.reset();
        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn max_below_min_is_raised() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.next(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(10)));
    }
}
