use std::time::Duration;

use super::classify::Classification;
use crate::config::ClientConfig;

/// Bounded retries with linear backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, first attempt included
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_step: config.backoff_step,
        }
    }

    pub fn context(&self) -> RetryContext {
        RetryContext {
            attempt: 0,
            max_attempts: self.max_attempts,
            last_classification: None,
        }
    }

    /// Delay before the next attempt.
    ///
    /// Retryable failures wait `attempts_made * step`. Rate-limit and auth
    /// failures on a proxy go straight to the next proxy; without a proxy
    /// they back off like any other retryable failure.
    pub fn backoff_delay(&self, context: &RetryContext, proxied: bool) -> Duration {
        let linear = self.backoff_step.saturating_mul(context.attempt);
        match context.last_classification {
            Some(Classification::Retryable) => linear,
            Some(Classification::RateLimited | Classification::AuthStale) if !proxied => linear,
            _ => Duration::ZERO,
        }
    }
}

/// Progress of one logical request through the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts made so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_classification: Option<Classification>,
}

impl RetryContext {
    pub fn record(&mut self, classification: Classification) {
        self.attempt += 1;
        self.last_classification = Some(classification);
    }

    fn has_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Whether the loop should issue another attempt
    pub fn should_retry(&self) -> bool {
        self.has_remaining()
            && self
                .last_classification
                .map_or(true, Classification::is_retryable)
    }
}
