//! Exponential backoff with jitter, shared by event retries and watch resubscription.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before giving up, `0` never gives up.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    pub fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self::bounded(0, initial_delay, max_delay)
    }
}

#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            delay: policy.initial_delay,
            policy,
            failures: 0,
        }
    }

    /// Records a failed attempt and returns how long to wait before the next one, or `None` once
    /// the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);

        if self.policy.max_attempts > 0 && self.failures >= self.policy.max_attempts {
            return None;
        }

        let jitter = rand::random_range(0.5..1.5);
        let delay = self.delay.mul_f64(jitter).min(self.policy.max_delay);

        self.delay = self
            .delay
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_delay);

        Some(delay)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.delay = self.policy.initial_delay;
    }
}
