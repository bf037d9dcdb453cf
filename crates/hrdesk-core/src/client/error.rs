//! Error types surfaced by the API client.

use std::fmt;

/// Categories of renewal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalErrorKind {
    /// The renewal endpoint could not be reached
    Transport,
    /// The renewal endpoint answered with a non-2xx status
    HttpStatus,
    /// The renewal response did not carry a token pair
    Parse,
    /// No token pair was persisted when renewal started
    MissingCredentials,
    /// The token store could not be read or written
    Store,
}

impl fmt::Display for RenewalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewalErrorKind::Transport => write!(f, "transport"),
            RenewalErrorKind::HttpStatus => write!(f, "http_status"),
            RenewalErrorKind::Parse => write!(f, "parse"),
            RenewalErrorKind::MissingCredentials => write!(f, "missing_credentials"),
            RenewalErrorKind::Store => write!(f, "store"),
        }
    }
}

/// Why a token renewal failed.
///
/// `Clone` because one renewal outcome is handed to every request that
/// waited on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalError {
    pub kind: RenewalErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// HTTP status, for `HttpStatus` failures
    pub status: Option<u16>,
    /// Raw response body or lower-level cause
    pub details: Option<String>,
}

impl RenewalError {
    pub fn new(kind: RenewalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            details: None,
        }
    }

    pub fn http_status(status: u16, body: &str) -> Self {
        Self {
            kind: RenewalErrorKind::HttpStatus,
            message: format!("token renewal rejected (HTTP {status})"),
            status: Some(status),
            details: (!body.is_empty()).then(|| body.to_string()),
        }
    }

    pub fn transport(err: &reqwest::Error) -> Self {
        Self {
            kind: RenewalErrorKind::Transport,
            message: "token renewal request failed".to_string(),
            status: None,
            details: Some(err.to_string()),
        }
    }

    pub fn missing_credentials() -> Self {
        Self::new(
            RenewalErrorKind::MissingCredentials,
            "no stored credentials to renew",
        )
    }

    pub fn store(err: &anyhow::Error) -> Self {
        Self {
            kind: RenewalErrorKind::Store,
            message: "token store unavailable during renewal".to_string(),
            status: None,
            details: Some(format!("{err:#}")),
        }
    }
}

impl fmt::Display for RenewalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {details}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RenewalError {}

/// Error returned by [`AuthClient`](super::AuthClient) operations.
#[derive(Debug)]
pub enum ClientError {
    /// No response was received (connect, DNS, TLS, transport timeout).
    Transport(String),
    /// The server answered with a non-2xx status. Includes a 401 received
    /// after the one allowed renewal.
    Http { status: u16, body: String },
    /// A 401 triggered renewal and renewal failed. Tokens have been cleared.
    RenewalFailed(RenewalError),
    /// The token store could not be read or written.
    TokenStore(String),
    /// A success body could not be decoded into the requested type.
    Decode(String),
    /// The request could not be built (bad header, URL or body).
    InvalidRequest(String),
}

impl ClientError {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Transport(format!("request timed out: {err}"))
        } else {
            ClientError::Transport(err.to_string())
        }
    }

    pub(crate) fn store(err: &anyhow::Error) -> Self {
        ClientError::TokenStore(format!("{err:#}"))
    }

    /// HTTP status code, for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the session was lost and the user must log in again.
    pub fn is_auth_lost(&self) -> bool {
        matches!(self, ClientError::RenewalFailed(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(message) => write!(f, "transport error: {message}"),
            ClientError::Http { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            ClientError::Http { status, body } => write!(f, "HTTP {status}: {body}"),
            ClientError::RenewalFailed(err) => write!(f, "session expired: {err}"),
            ClientError::TokenStore(message) => write!(f, "token store error: {message}"),
            ClientError::Decode(message) => write!(f, "failed to decode response: {message}"),
            ClientError::InvalidRequest(message) => write!(f, "invalid request: {message}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::RenewalFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_includes_body() {
        let err = ClientError::Http {
            status: 404,
            body: r#"{"title":"Not Found"}"#.to_string(),
        };
        assert_eq!(err.to_string(), r#"HTTP 404: {"title":"Not Found"}"#);
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_auth_lost());
    }

    #[test]
    fn test_renewal_failure_exposes_source() {
        let err = ClientError::RenewalFailed(RenewalError::http_status(400, "invalid token"));
        assert!(err.is_auth_lost());
        assert_eq!(err.status(), None);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.to_string(),
            "token renewal rejected (HTTP 400): invalid token"
        );
    }

    #[test]
    fn test_missing_credentials_has_no_details() {
        let err = RenewalError::missing_credentials();
        assert_eq!(err.kind, RenewalErrorKind::MissingCredentials);
        assert_eq!(err.to_string(), "no stored credentials to renew");
    }
}
