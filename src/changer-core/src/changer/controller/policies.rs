// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Retry and polling policies for the hardware driver.

use std::time::Duration;

/// Policy for retrying a failed driver connection.
pub trait RetryPolicy: Send + Sync {
    /// Determine if attempt number `attempt` (zero based) may be retried.
    fn should_retry(&self, attempt: u32) -> bool;

    /// Delay before the next attempt.
    fn delay(&self, attempt: u32) -> Duration;

    fn max_attempts(&self) -> u32;
}

/// Exponential backoff retry policy.
///
/// Delays double with each attempt, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Defaults for the robot dashboard connection.
    pub fn default_robot() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::default_robot()
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Policy for polling the driver status.
pub trait PollingPolicy: Send + Sync {
    fn interval(&self, busy: bool) -> Duration;
}

/// Polls faster while a program is running.
#[derive(Debug, Clone)]
pub struct AdaptivePolling {
    idle_interval: Duration,
    busy_interval: Duration,
}

impl AdaptivePolling {
    pub fn new(idle_interval: Duration, busy_interval: Duration) -> Self {
        Self {
            idle_interval,
            busy_interval,
        }
    }

    /// Busy interval is a quarter of `idle`, but not below 50 ms.
    pub fn from_idle(idle: Duration) -> Self {
        let busy = (idle / 4).max(Duration::from_millis(50)).min(idle);
        Self::new(idle, busy)
    }
}

impl Default for AdaptivePolling {
    fn default() -> Self {
        Self::from_idle(Duration::from_secs(1))
    }
}

impl PollingPolicy for AdaptivePolling {
    fn interval(&self, busy: bool) -> Duration {
        if busy {
            self.busy_interval
        } else {
            self.idle_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = ExponentialBackoff::new(5, Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_attempts() {
        let policy = ExponentialBackoff::new(3, Duration::from_millis(10), Duration::from_secs(1));

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_adaptive_polling() {
        let policy = AdaptivePolling::from_idle(Duration::from_millis(1000));
        assert_eq!(policy.interval(false), Duration::from_millis(1000));
        assert_eq!(policy.interval(true), Duration::from_millis(250));

        let fast = AdaptivePolling::from_idle(Duration::from_millis(20));
        assert_eq!(fast.interval(true), Duration::from_millis(20));
    }
}
