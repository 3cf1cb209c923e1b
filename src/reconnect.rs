use tokio::time::Duration;

use crate::{Error, options::ReconnectPolicy};

/// Counts reconnect attempts against a [`ReconnectPolicy`].
#[derive(Debug)]
pub struct Reconnect {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Reconnect {
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a connection that ended with `error` may be re-established.
    ///
    /// Closures requested by the caller and clean closes never are.
    pub fn should_reconnect(&self, error: Option<&Error>) -> bool {
        self.policy.enabled && error.is_some_and(Error::is_retryable)
    }

    /// Delay before the next attempt, or `None` once the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }

        if let Some(max_attempts) = self.policy.max_attempts {
            if self.attempts >= max_attempts {
                tracing::debug!(attempts = self.attempts, "Reconnect attempts exhausted");

                return None;
            }
        }

        self.attempts += 1;

        Some(self.policy.delay)
    }

    /// Called once a connection reaches open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
