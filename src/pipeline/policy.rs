use std::time::Duration;

use crate::config::Config;
use crate::llm::types::FailureKind;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    Degrade,
}

/// The single retry/degrade table shared by image and caption sub-jobs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn decide(&self, kind: FailureKind, attempt: u32) -> Decision {
        if !kind.is_transient() || attempt > self.max_retries {
            return Decision::Degrade;
        }
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        Decision::Retry(self.base_delay.saturating_mul(factor).min(MAX_BACKOFF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(900),
            attempt_timeout: Duration::from_secs(90),
        }
    }

    #[test]
    fn transient_failures_back_off_exponentially() {
        let policy = policy();
        assert_eq!(
            policy.decide(FailureKind::ServerError, 1),
            Decision::Retry(Duration::from_millis(900))
        );
        assert_eq!(
            policy.decide(FailureKind::Timeout, 2),
            Decision::Retry(Duration::from_millis(1800))
        );
        assert_eq!(policy.decide(FailureKind::RateLimited, 3), Decision::Degrade);
    }

    #[test]
    fn permanent_failures_degrade_immediately() {
        let policy = policy();
        for kind in [
            FailureKind::Auth,
            FailureKind::QuotaExhausted,
            FailureKind::ContentRejected,
            FailureKind::QualityRejected,
            FailureKind::DeadlineExceeded,
            FailureKind::Cancelled,
        ] {
            assert_eq!(policy.decide(kind, 1), Decision::Degrade, "{kind}");
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 20,
            ..policy()
        };
        assert_eq!(policy.decide(FailureKind::Network, 12), Decision::Retry(MAX_BACKOFF));
    }
}
