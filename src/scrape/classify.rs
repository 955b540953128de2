//! Error classification for provider failures.
//!
//! Provider implementations report what went wrong in transport terms
//! ([`ProviderError`]: an HTTP status, a connection failure, a body that did
//! not decode). The engine never acts on those directly. Every failure is
//! first normalised by [`classify`] into a [`ScrapeError`], whose
//! [`ErrorKind`] carries the retry/abort policy the scheduler follows.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reelscrape_common::ProviderName;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Provider-layer failures
// ---------------------------------------------------------------------------

/// Transport-level cause of a [`ScrapeError::Network`] failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum NetworkCause {
    /// The call exceeded its deadline.
    Timeout,
    /// Host name resolution failed.
    Dns,
    /// TLS handshake or certificate validation failed.
    Tls,
    /// The remote end refused or reset the connection.
    ConnectionRefused,
    /// The provider answered with a 5xx status.
    ServerError { status: u16 },
    /// The provider rejected the request (401, 403, other 4xx).
    Rejected { status: u16 },
    /// Anything else the transport reported.
    Other { message: String },
}

impl fmt::Display for NetworkCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Dns => f.write_str("dns resolution failed"),
            Self::Tls => f.write_str("tls failure"),
            Self::ConnectionRefused => f.write_str("connection refused"),
            Self::ServerError { status } => write!(f, "server error (HTTP {status})"),
            Self::Rejected { status } => write!(f, "request rejected (HTTP {status})"),
            Self::Other { message } => f.write_str(message),
        }
    }
}

/// Failure reported by a [`Provider`](super::provider::Provider) call before
/// classification.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-success HTTP status.
    #[error("HTTP status {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(NetworkCause),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The call was valid but matched no entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider signalled its own rate limit without an HTTP status.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The provider cannot serve this kind of request at all.
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Transport(NetworkCause::Timeout);
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Status {
                status: status.as_u16(),
                retry_after: None,
            };
        }
        if err.is_connect() {
            let chain = error_chain(&err).to_ascii_lowercase();
            let cause = if chain.contains("dns") || chain.contains("resolve") {
                NetworkCause::Dns
            } else if chain.contains("certificate") || chain.contains("tls") {
                NetworkCause::Tls
            } else {
                NetworkCause::ConnectionRefused
            };
            return Self::Transport(cause);
        }
        Self::Transport(NetworkCause::Other {
            message: err.to_string(),
        })
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Parse an HTTP `Retry-After` header value (delta-seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

// ---------------------------------------------------------------------------
// Normalised outcomes
// ---------------------------------------------------------------------------

/// The small set of outcome classes every failure is normalised into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkError,
    RateLimited,
    NotFound,
    MalformedResponse,
    MissingDependency,
    InvalidConfiguration,
}

/// What the engine does after a failure of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Stop the whole batch before any network call is made.
    AbortBatch,
    /// Back off until the provider's budget recovers, then retry once.
    RetryOnceAfterBackoff,
    /// Fail the job on first occurrence.
    Terminal,
}

impl ErrorKind {
    /// The retry/abort policy attached to this kind.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::InvalidConfiguration => RetryPolicy::AbortBatch,
            Self::RateLimited => RetryPolicy::RetryOnceAfterBackoff,
            Self::NetworkError
            | Self::NotFound
            | Self::MalformedResponse
            | Self::MissingDependency => RetryPolicy::Terminal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::MalformedResponse => "malformed_response",
            Self::MissingDependency => "missing_dependency",
            Self::InvalidConfiguration => "invalid_configuration",
        };
        f.write_str(name)
    }
}

/// A classified scrape failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScrapeError {
    /// Transport-level failure (timeout, DNS, TLS, refused, 5xx).
    #[error("network error from {provider}: {cause}")]
    Network {
        provider: ProviderName,
        cause: NetworkCause,
    },

    /// The provider's rate limit was hit and the single retry was spent.
    #[error("{provider} rate limit exceeded")]
    RateLimited {
        provider: ProviderName,
        retry_after: Option<Duration>,
    },

    /// The call was valid but no matching entity exists.
    #[error("{provider}: not found: {message}")]
    NotFound {
        provider: ProviderName,
        message: String,
    },

    /// The provider returned data that failed to parse.
    #[error("{provider}: malformed response: {message}")]
    MalformedResponse {
        provider: ProviderName,
        message: String,
    },

    /// A required parent id was absent or its job failed.
    #[error("missing dependency: {message}")]
    MissingDependency { message: String },

    /// Caller-side setup error.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl ScrapeError {
    /// The outcome class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::NetworkError,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::MissingDependency { .. } => ErrorKind::MissingDependency,
            Self::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
        }
    }

    /// Convenience for `self.kind().retry_policy()`.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.kind().retry_policy()
    }

    /// Convenience constructor for [`ScrapeError::InvalidConfiguration`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`ScrapeError::MissingDependency`].
    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self::MissingDependency {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`ScrapeError::NotFound`].
    pub fn not_found(provider: &ProviderName, message: impl Into<String>) -> Self {
        Self::NotFound {
            provider: provider.clone(),
            message: message.into(),
        }
    }

    /// A call to `provider` ran past its deadline.
    pub fn timeout(provider: &ProviderName) -> Self {
        Self::Network {
            provider: provider.clone(),
            cause: NetworkCause::Timeout,
        }
    }
}

/// Normalise a provider-layer failure into a [`ScrapeError`].
pub fn classify(provider: &ProviderName, err: ProviderError) -> ScrapeError {
    let provider = provider.clone();
    match err {
        ProviderError::Status {
            status: 429,
            retry_after,
        }
        | ProviderError::RateLimited { retry_after } => ScrapeError::RateLimited {
            provider,
            retry_after,
        },
        // A 503 carrying Retry-After is the provider asking us to slow down.
        ProviderError::Status {
            status: 503,
            retry_after: Some(wait),
        } => ScrapeError::RateLimited {
            provider,
            retry_after: Some(wait),
        },
        ProviderError::Status { status: 404, .. } => ScrapeError::NotFound {
            provider,
            message: "provider returned HTTP 404".to_string(),
        },
        ProviderError::Status { status, .. } if status >= 500 => ScrapeError::Network {
            provider,
            cause: NetworkCause::ServerError { status },
        },
        ProviderError::Status { status, .. } => ScrapeError::Network {
            provider,
            cause: NetworkCause::Rejected { status },
        },
        ProviderError::Transport(cause) => ScrapeError::Network { provider, cause },
        ProviderError::Decode(message) => ScrapeError::MalformedResponse { provider, message },
        ProviderError::NotFound(message) => ScrapeError::NotFound { provider, message },
        ProviderError::Unsupported(message) => ScrapeError::InvalidConfiguration {
            message: format!("{provider}: {message}"),
        },
    }
}
