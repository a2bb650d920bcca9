//! Reconnect delay policy

use std::time::Duration;

use crate::config::{BackoffKind, ReconnectConfig};

/// Pure mapping from retry index to delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// `min(base * 2^n, cap)`
    Exponential { base: Duration, cap: Duration },
    /// Fixed delays; indices past the end reuse the last one
    Schedule(Vec<Duration>),
}

impl BackoffPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        let cap = Duration::from_millis(config.max_delay_ms);
        match config.kind {
            BackoffKind::Schedule if !config.schedule_ms.is_empty() => BackoffPolicy::Schedule(
                config
                    .schedule_ms
                    .iter()
                    .map(|&ms| Duration::from_millis(ms).min(cap))
                    .collect(),
            ),
            _ => BackoffPolicy::Exponential {
                base: Duration::from_millis(config.base_delay_ms),
                cap,
            },
        }
    }

    /// Delay before retry `n` (0-based)
    pub fn delay(&self, n: u32) -> Duration {
        match self {
            BackoffPolicy::Exponential { base, cap } => {
                let factor = 1u32.checked_shl(n.min(31)).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(*cap, |d| d.min(*cap))
            }
            BackoffPolicy::Schedule(delays) => {
                let idx = (n as usize).min(delays.len().saturating_sub(1));
                delays.get(idx).copied().unwrap_or_default()
            }
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Counts consecutive failures against the policy
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: BackoffPolicy,
    max_attempts: u32,
    failures: u32,
}

impl ReconnectTracker {
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(BackoffPolicy::from_config(config), config.max_attempts)
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.policy.delay(self.failures - 1))
        }
    }

    /// Called on every successful entry into streaming
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far
    pub fn attempt(&self) -> u32 {
        self.failures
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
