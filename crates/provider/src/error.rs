#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("LLM call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Rate limited. Retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("HTTP error: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse plan: {0}")]
    Parse(String),

    #[error("Missing credentials for {0}")]
    MissingCredentials(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl ProviderError {
    pub fn from_http(status: u16, body: String, retry_after: Option<&str>) -> Self {
        if status == 429 {
            let retry_after_ms = retry_after
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(2000);
            return ProviderError::RateLimited { retry_after_ms };
        }
        ProviderError::Http { status, body }
    }

    /// Timeouts, rate limits, and 5xx responses are retryable; 4xx are fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::RateLimited { .. } => true,
            ProviderError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ProviderError::Timeout { timeout_ms: 0 };
        }
        ProviderError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_from_429() {
        let err = ProviderError::from_http(429, String::new(), Some("5"));
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_ms: 5000
            }
        ));
    }

    #[test]
    fn server_errors_retry_client_errors_do_not() {
        assert!(ProviderError::from_http(503, "oops".into(), None).is_retryable());
        assert!(!ProviderError::from_http(401, "denied".into(), None).is_retryable());
        assert!(ProviderError::Timeout { timeout_ms: 30_000 }.is_retryable());
        assert!(!ProviderError::Parse("bad".into()).is_retryable());
    }
}
