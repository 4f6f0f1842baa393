//! Provider failure taxonomy.
//!
//! Every variant maps to a stable [`ProviderError::code`] used in usage records.
//! Whether a failure is transient is recorded (`is_retryable`) but not acted on
//! here: the gateway makes one attempt and the sampler decides what to retry.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// What the provider told us about a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// `error.code` from the response body, stringified when numeric.
    pub provider_code: Option<String>,
    /// `x-request-id` response header.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(status) = self.http_status {
            parts.push(format!("status={status}"));
        }
        if let Some(code) = &self.provider_code {
            parts.push(format!("code={code}"));
        }
        if let Some(id) = &self.request_id {
            parts.push(format!("request_id={id}"));
        }
        f.write_str(&parts.join(" "))
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429.
    #[error("{provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: &'static str,
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// The request itself is wrong; resending it will not help.
    #[error("request rejected: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// The model declined to role-play the observer.
    #[error("model refused: {message}")]
    Refused {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("{provider} failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration, Option<ErrorContext>),

    #[error("transport: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing credentials, unknown provider, unusable header values.
    #[error("provider not configured: {0}")]
    Config(String),
}

/// Back-off hint attached to 429s when the provider sends none.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

impl ProviderError {
    /// Classify a non-2xx response.
    ///
    /// 429 is a rate limit, 400/404/413/422 are invalid requests, 5xx and 408
    /// are transient provider errors, anything else is a permanent provider error.
    pub fn from_status(
        provider: &'static str,
        status: u16,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                provider,
                retry_after: DEFAULT_RETRY_AFTER,
                context: Some(context),
            },
            400 | 404 | 413 | 422 => Self::InvalidRequest {
                message,
                context: Some(context),
            },
            s => Self::Provider {
                provider,
                message,
                retryable: s == 408 || s >= 500,
                context: Some(context),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn refused(message: impl Into<String>, context: Option<ErrorContext>) -> Self {
        Self::Refused {
            message: message.into(),
            context,
        }
    }

    /// Malformed or unusable 2xx response.
    pub fn bad_response(
        provider: &'static str,
        message: impl Into<String>,
        context: Option<ErrorContext>,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable: false,
            context,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the provider itself considers this error transient.
    ///
    /// Informational: it ends up in logs and usage records.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(..) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest { .. } | Self::Refused { .. } | Self::Config(_) => false,
        }
    }

    /// Short code for usage records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Refused { .. } => "refused",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(..) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. }
            | Self::InvalidRequest { context, .. }
            | Self::Refused { context, .. }
            | Self::Provider { context, .. }
            | Self::Timeout(_, context) => context.as_ref(),
            Self::Http(_) | Self::Config(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
