//! LLM error types

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Fallback wait when a 429 carries no usable retry-after header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Classify a non-success HTTP status
    ///
    /// 429 and Anthropic's 529 (overloaded) both map to `RateLimited`.
    pub fn from_status(status: u16, retry_after_header: Option<&str>, body: String) -> Self {
        debug!(status, ?retry_after_header, "from_status: called");
        match status {
            429 | 529 => {
                let retry_after = retry_after_header
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                LlmError::RateLimited { retry_after }
            }
            _ => LlmError::ApiError { status, message: body },
        }
    }

    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
        }
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_rate_limit() {
        let err = LlmError::from_status(429, Some("12"), String::new());
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));

        let err = LlmError::from_status(529, None, "overloaded".to_string());
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));

        let err = LlmError::from_status(429, Some("soon"), String::new());
        assert_eq!(err.retry_after(), Some(DEFAULT_RETRY_AFTER));
    }

    #[test]
    fn test_from_status_api_error() {
        let err = LlmError::from_status(400, None, "bad request".to_string());
        assert!(!err.is_rate_limit());
        assert!(matches!(err, LlmError::ApiError { status: 400, .. }));
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            LlmError::ApiError {
                status: 502,
                message: "Bad gateway".to_string()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::ApiError {
                status: 400,
                message: "Bad request".to_string()
            }
            .is_retryable()
        );
        assert!(LlmError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!LlmError::InvalidResponse("Bad JSON".to_string()).is_retryable());
    }
}
