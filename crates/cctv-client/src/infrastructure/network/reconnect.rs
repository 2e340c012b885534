//! Attempt-counted reconnect policy.
//!
//! The policy never touches a socket or a timer.  The connection task asks it
//! what to do after each failure and then does it:
//!
//! ```text
//! failure ─► on_disconnect(auto_reconnect)
//!              ├─ Disabled            stay down
//!              ├─ Retry{attempt,delay} sleep(delay), connect again
//!              └─ Exhausted           emit terminal error, stay down
//! success ─► on_connected()  (attempts back to 0)
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay growth between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Every retry waits the base delay.
    #[default]
    Fixed,
    /// Retry `n` waits `delay * factor^(n-1)`, capped at `max_delay_ms`.
    Exponential { factor: f64, max_delay_ms: u64 },
}

/// Tunables for [`ReconnectPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    /// Base delay before each retry.
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(3000),
            backoff: Backoff::Fixed,
        }
    }
}

/// What the connection task should do after a failed or closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make retry number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// `max_attempts` retries have already failed.
    Exhausted { max_attempts: u32 },
    /// Auto-reconnect is switched off.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Retries made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Records a failure and decides whether to retry.
    pub fn on_disconnect(&mut self, auto_reconnect: bool) -> ReconnectDecision {
        if !auto_reconnect {
            return ReconnectDecision::Disabled;
        }
        if self.attempts >= self.config.max_attempts {
            return ReconnectDecision::Exhausted {
                max_attempts: self.config.max_attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.delay_for_attempt(self.attempts),
        }
    }

    /// Resets the attempt counter after a successful connection.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// Forgets past failures, e.g. when the caller starts a fresh `connect()`.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.config.backoff {
            Backoff::Fixed => self.config.delay,
            Backoff::Exponential {
                factor,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let millis = self.config.delay.as_millis() as f64 * factor.max(1.0).powi(exponent);
                Duration::from_millis(millis.min(max_delay_ms as f64) as u64)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_failures_then_sixth_is_suppressed() {
        // Arrange
        let mut policy = ReconnectPolicy::default();

        // Act – five consecutive failures each schedule a retry
        for expected in 1..=5 {
            let decision = policy.on_disconnect(true);
            assert_eq!(
                decision,
                ReconnectDecision::Retry {
                    attempt: expected,
                    delay: Duration::from_millis(3000)
                }
            );
        }

        // Assert – the sixth retry is suppressed
        assert_eq!(policy.attempts(), 5);
        assert_eq!(
            policy.on_disconnect(true),
            ReconnectDecision::Exhausted { max_attempts: 5 }
        );
        assert_eq!(policy.attempts(), 5, "exhaustion must not keep counting");
    }

    #[test]
    fn test_success_resets_attempts() {
        // Arrange
        let mut policy = ReconnectPolicy::default();
        policy.on_disconnect(true);
        policy.on_disconnect(true);

        // Act
        policy.on_connected();

        // Assert
        assert_eq!(policy.attempts(), 0);
        assert!(matches!(
            policy.on_disconnect(true),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_disabled_does_not_count() {
        let mut policy = ReconnectPolicy::default();

        assert_eq!(policy.on_disconnect(false), ReconnectDecision::Disabled);
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        // Arrange
        let policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 10,
            delay: Duration::from_millis(1000),
            backoff: Backoff::Exponential {
                factor: 2.0,
                max_delay_ms: 5000,
            },
        });

        // Act / Assert
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });

        assert_eq!(
            policy.on_disconnect(true),
            ReconnectDecision::Exhausted { max_attempts: 0 }
        );
    }
}
