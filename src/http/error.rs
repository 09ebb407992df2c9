use std::fmt;
use thiserror::Error;

/// Coarse classification of a failed request, used to pick a retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Timeout,
    RateLimited,
    ServerError,
    ClientError,
    MalformedResponse,
    NetworkError,
}

impl FetchErrorKind {
    fn label(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::ServerError => "server_error",
            FetchErrorKind::ClientError => "client_error",
            FetchErrorKind::MalformedResponse => "malformed_response",
            FetchErrorKind::NetworkError => "network_error",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Rate limited by API at {url}")]
    RateLimited { url: String },

    #[error("Server error {status} for {url}")]
    ServerError { url: String, status: u16 },

    #[error("Request to {url} rejected with status {status}")]
    ClientError { url: String, status: u16 },

    #[error("Malformed response body from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("Network failure for {url}: {message}")]
    NetworkError { url: String, message: String },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout { .. } => FetchErrorKind::Timeout,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::ServerError { .. } => FetchErrorKind::ServerError,
            FetchError::ClientError { .. } => FetchErrorKind::ClientError,
            FetchError::MalformedResponse { .. } => FetchErrorKind::MalformedResponse,
            FetchError::NetworkError { .. } => FetchErrorKind::NetworkError,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Timeout { url }
            | FetchError::RateLimited { url }
            | FetchError::ServerError { url, .. }
            | FetchError::ClientError { url, .. }
            | FetchError::MalformedResponse { url, .. }
            | FetchError::NetworkError { url, .. } => url,
        }
    }

    /// Maps an HTTP status that is not a success onto the matching variant.
    pub(crate) fn from_status(url: String, status: u16) -> Self {
        match status {
            429 => FetchError::RateLimited { url },
            500..=599 => FetchError::ServerError { url, status },
            _ => FetchError::ClientError { url, status },
        }
    }

    pub(crate) fn from_reqwest(url: String, e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { url }
        } else if e.is_decode() {
            FetchError::MalformedResponse {
                url,
                message: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            FetchError::from_status(url, status.as_u16())
        } else {
            FetchError::NetworkError {
                url,
                message: e.to_string(),
            }
        }
    }
}
