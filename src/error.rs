//! Error types for the search library.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Deadline budget exhausted.
    #[error("Deadline exceeded")]
    Timeout,

    /// Connection or TLS level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected HTTP status under strict checking.
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// Explicit block (e.g. 402/403 or a detected firewall page).
    #[error("Access denied: status {status}")]
    AccessDenied { status: u16 },

    /// Backend signalled rate limiting (status 429).
    #[error("Rate limited by backend")]
    RateLimited,

    /// Challenge page detected in the response body.
    #[error("CAPTCHA challenge detected")]
    Captcha,

    /// Adapter could not interpret a well-formed response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Invalid or unverifiable outbound configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// No engines configured.
    #[error("No search engines configured")]
    NoEngines,

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SearchError {
    /// Classifies an HTTP status code under strict checking.
    pub fn from_status(status: u16) -> Self {
        match status {
            402 | 403 => Self::AccessDenied { status },
            429 => Self::RateLimited,
            _ => Self::Http { status },
        }
    }

    /// Whether this error should trip the circuit breaker.
    ///
    /// Parse errors and unclassified errors do not suspend: a parsing bug
    /// is not evidence of hostile blocking.
    pub fn is_suspending(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Transport(_)
                | Self::Http { .. }
                | Self::AccessDenied { .. }
                | Self::RateLimited
                | Self::Captcha
        )
    }

    /// Whether a retry on a fresh or existing transport may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Fixed suspend duration in seconds for error kinds that carry one.
    pub fn fixed_suspend_secs(&self) -> Option<u64> {
        match self {
            Self::Captcha => Some(86_400),
            Self::AccessDenied { .. } => Some(86_400),
            Self::RateLimited => Some(3_600),
            _ => None,
        }
    }

    /// Short classification label for diagnostics and the unresponsive set.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Http { .. } => "http",
            Self::AccessDenied { .. } => "access_denied",
            Self::RateLimited => "rate_limited",
            Self::Captcha => "captcha",
            Self::Parse(_) => "parse",
            Self::Config(_) => "config",
            Self::UrlParse(_) => "url",
            Self::NoEngines => "no_engines",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}
