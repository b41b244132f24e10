//! Error classification and backoff schedule.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::LlmError;

/// How the fallback controller treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Back off and retry the same model.
    RateLimited,
    /// Move to the next candidate without sleeping.
    Transport,
    /// Move to the next candidate; the same credential will keep failing.
    Authentication,
}

static RATE_LIMIT_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests").expect("valid rate-limit regex")
});

/// Classify an adapter error.
pub fn classify_error(err: &LlmError) -> ErrorClass {
    match err {
        LlmError::RateLimited { .. } => ErrorClass::RateLimited,
        LlmError::AuthFailed { .. } => ErrorClass::Authentication,
        LlmError::Http(e) if e.status().is_some_and(|s| s.as_u16() == 429) => {
            ErrorClass::RateLimited
        }
        other if RATE_LIMIT_SIGNATURE.is_match(&other.to_string()) => ErrorClass::RateLimited,
        _ => ErrorClass::Transport,
    }
}

pub fn is_retryable(err: &LlmError) -> bool {
    classify_error(err) == ErrorClass::RateLimited
}

/// Per-model retry budget and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, per candidate model.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retrying after failed attempt `attempt` (0-based):
    /// `base_delay * 2^attempt`, no jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(reason: &str) -> LlmError {
        LlmError::RequestFailed {
            provider: "p".to_string(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(
            classify_error(&LlmError::RateLimited {
                provider: "p".to_string(),
                retry_after: None,
                reason: String::new(),
            }),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify_error(&LlmError::AuthFailed {
                provider: "p".to_string(),
                reason: "HTTP 403 Forbidden: too many requests from this key".to_string(),
            }),
            ErrorClass::Authentication
        );
        assert_eq!(
            classify_error(&failed("HTTP 429 Too Many Requests: slow down")),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify_error(&failed("upstream is rate-limited")),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify_error(&failed("too many requests")),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify_error(&failed("HTTP 500 Internal Server Error")),
            ErrorClass::Transport
        );
        assert_eq!(
            classify_error(&failed("request id 14290 failed")),
            ErrorClass::Transport
        );
        assert_eq!(
            classify_error(&LlmError::InvalidResponse {
                provider: "p".to_string(),
                reason: "no choices".to_string()
            }),
            ErrorClass::Transport
        );
    }

    #[test]
    fn only_rate_limits_are_retryable() {
        assert!(is_retryable(&failed("rate limit exceeded")));
        assert!(!is_retryable(&LlmError::AuthFailed {
            provider: "p".to_string(),
            reason: String::new(),
        }));
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(1600));
    }

    #[test]
    fn backoff_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(64), Duration::from_secs(u32::MAX as u64));
    }
}
