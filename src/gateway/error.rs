//! Errors from the chat gateway and its OpenAI-compatible adapter.

use std::time::Duration;
use thiserror::Error;

/// What the provider reported alongside a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// `x-request-id` response header.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn from_response(status: u16, request_id: Option<String>) -> Self {
        Self {
            http_status: Some(status),
            request_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429. The gateway retries these.
    #[error("rate limited, retry after {retry_after:?}: {message}")]
    RateLimited {
        retry_after: Duration,
        message: String,
        context: ErrorContext,
    },

    /// Rejected before sending; never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing or malformed credentials and endpoint settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn rate_limited(
        retry_after: Duration,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::RateLimited {
            retry_after,
            message: message.into(),
            context,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn provider(provider: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    /// Non-2xx reply other than 429; 5xx is retryable.
    pub fn from_status(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        let retryable = context.http_status.is_some_and(|s| s >= 500);
        Self::Provider {
            provider,
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest(_) | Self::Config(_) => false,
        }
    }

    /// Error label recorded in usage records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Provider { .. } => "provider_error",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => Some(context),
            Self::Provider { context, .. } => context.as_ref(),
            Self::InvalidRequest(_) | Self::Http(_) | Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_server_side_statuses_are_retryable() {
        let ctx = |status| ErrorContext::from_response(status, None);
        assert!(ProviderError::from_status("openai", "boom", ctx(503)).is_retryable());
        assert!(!ProviderError::from_status("openai", "bad", ctx(404)).is_retryable());
        let limited = ProviderError::rate_limited(Duration::from_secs(1), "slow", ctx(429));
        assert!(limited.is_retryable());
        assert!(!ProviderError::invalid_request("empty").is_retryable());
        assert_eq!(ProviderError::config("no key").context(), None);
    }
}
