//! Error types for batch-translator
//!
//! This module provides the error taxonomy used throughout the library:
//! - Provider failures split into auth, throttling, timeout, network and protocol errors
//! - A machine-readable [`ErrorKind`] carried by every [`BatchFailure`](crate::types::BatchFailure)
//! - Classification helpers for provider messages that only report failures as free text

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for batch-translator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for batch-translator
///
/// Each variant maps onto exactly one [`ErrorKind`]. Whether a variant is retried is
/// decided by [`IsRetryable`](crate::retry::IsRetryable).
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or rejected credentials (HTTP 401/403 or provider auth phrasing)
    #[error("authentication failed for engine {engine}: {message}")]
    Auth {
        /// Engine that rejected the request
        engine: String,
        /// Provider-supplied or local description
        message: String,
    },

    /// Provider signalled overload (HTTP 429 or equivalent)
    #[error("rate limited by engine {engine}")]
    RateLimited {
        /// Engine that signalled overload
        engine: String,
        /// Provider-suggested wait before the next request
        retry_after: Option<Duration>,
    },

    /// Request did not complete within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status that is neither auth nor throttling
    #[error("provider returned HTTP {status}: {message}")]
    Provider {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Malformed or short batch response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operator cancelled the running operation
    #[error("cancelled by user")]
    Cancelled,

    /// No provider registered under this engine id
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "batch_max_items")
        key: Option<String>,
    },

    /// I/O error (config file loading)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Machine-readable failure category reported per item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid credentials
    Auth,
    /// Provider overload
    RateLimit,
    /// Request timeout
    Timeout,
    /// Transport failure or non-success HTTP status
    Network,
    /// Malformed provider response
    Protocol,
    /// Operation was stopped by the operator before this item completed
    UserCancelled,
    /// Invalid engine or settings
    Config,
    /// Anything else
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::UserCancelled => "user_cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Category reported in batch failures
    pub fn kind(&self) -> ErrorKind {
        if self.is_auth_failure() {
            return ErrorKind::Auth;
        }
        match self {
            Error::Auth { .. } => ErrorKind::Auth,
            Error::RateLimited { .. } => ErrorKind::RateLimit,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Network(e) if e.is_timeout() => ErrorKind::Timeout,
            Error::Network(_) | Error::Provider { .. } | Error::Io(_) => ErrorKind::Network,
            Error::Protocol(_) | Error::Serialization(_) => ErrorKind::Protocol,
            Error::Cancelled => ErrorKind::UserCancelled,
            Error::UnknownEngine(_) | Error::Config { .. } => ErrorKind::Config,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Shorthand for a configuration error tied to a setting
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error means credentials are missing or rejected
    ///
    /// Besides [`Error::Auth`], provider errors whose message matches known
    /// auth-failure phrasing are treated as auth failures.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Auth { .. } => true,
            Error::Provider { status, message } => {
                matches!(status, 401 | 403) || is_auth_failure_message(message)
            }
            Error::Other(message) => is_auth_failure_message(message),
            _ => false,
        }
    }
}

/// Returns true if a free-text provider message describes an auth failure
///
/// # Examples
///
/// ```
/// use batch_translator::error::is_auth_failure_message;
///
/// assert!(is_auth_failure_message("Incorrect API key provided: sk-****"));
/// assert!(is_auth_failure_message("HTTP 401 Unauthorized"));
/// assert!(!is_auth_failure_message("upstream connect error"));
/// ```
pub fn is_auth_failure_message(message: &str) -> bool {
    static AUTH_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = AUTH_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(401|403)\b|unauthori[sz]ed|forbidden|authentication|permission denied|(invalid|incorrect|missing|no) api[ _-]?key|api[ _-]?key (is )?(invalid|missing|not valid)",
        )
        .ok()
    });
    match pattern {
        Some(re) => re.is_match(message),
        None => false,
    }
}
