use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

/// Backoff multiplier (1.5 which is 50% increase per backoff).
const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Randomization factor (0 which is no randomization).
const DEFAULT_RANDOMIZATION: f64 = 0.0;
/// Initial interval in milliseconds (1 second).
const INITIAL_INTERVAL: u64 = 1000;

/// A retry interval generator that increases timeouts with exponential backoff.
///
/// The first call to [`next_backoff`](Self::next_backoff) yields a zero duration, so the first
/// attempt is made immediately. Subsequent calls grow the interval exponentially until it is capped
/// at the configured maximum.
#[derive(Debug)]
pub struct RetryBackoff {
    backoff: ExponentialBackoff,
    attempt: usize,
}

impl RetryBackoff {
    /// Creates a new retry backoff based on configured thresholds.
    pub fn new(max_interval: Duration) -> Self {
        Self::with_initial_interval(Duration::from_millis(INITIAL_INTERVAL), max_interval)
    }

    /// Creates a new retry backoff with a custom initial interval.
    ///
    /// The initial interval is clamped to `max_interval`.
    pub fn with_initial_interval(initial_interval: Duration, max_interval: Duration) -> Self {
        let initial_interval = initial_interval.min(max_interval);

        let backoff = ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: DEFAULT_RANDOMIZATION,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval,
            max_elapsed_time: None,
            start_time: Instant::now(),
            ..Default::default()
        };

        RetryBackoff {
            backoff,
            attempt: 0,
        }
    }

    /// Resets this backoff to its initial state.
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.attempt = 0;
    }

    /// Indicates whether a backoff attempt has started.
    pub fn started(&self) -> bool {
        self.attempt > 0
    }

    /// Returns the number of the retry attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the next backoff duration.
    pub fn next_backoff(&mut self) -> Duration {
        let duration = match self.attempt {
            0 => Duration::new(0, 0),
            _ => self
                .backoff
                .next_backoff()
                .unwrap_or(self.backoff.max_interval)
                .min(self.backoff.max_interval),
        };

        self.attempt += 1;
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_is_immediate() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(10));
        assert!(!backoff.started());
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
        assert!(backoff.started());
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn test_grows_and_caps() {
        let max = Duration::from_secs(3);
        let mut backoff = RetryBackoff::with_initial_interval(Duration::from_secs(1), max);

        let delays: Vec<_> = (0..8).map(|_| backoff.next_backoff()).collect();
        assert_eq!(delays[0], Duration::ZERO);
        assert_eq!(delays[1], Duration::from_secs(1));
        assert!(delays[2] > delays[1]);
        assert!(delays.iter().all(|d| *d <= max));
        assert_eq!(delays[7], max);
    }

    #[test]
    fn test_reset() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(5));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_initial_interval_clamped() {
        let mut backoff =
            RetryBackoff::with_initial_interval(Duration::from_secs(5), Duration::from_secs(1));
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    }
}
