//! Error taxonomy shared by the query and subscription paths.
//!
//! Every failure that reaches a caller is a [`NormalizedError`]. Values are
//! only produced by the functions in [`crate::normalize`]; callers read the
//! fields to build user-facing text and never mutate them.

use std::fmt;

/// Why a request never produced an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFailure {
    /// The per-call timeout (connect or read) expired.
    Timeout,
    /// Connection refused, DNS failure, TLS failure, or reset.
    Unreachable,
}

/// Failure category of a [`NormalizedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The endpoint could not be reached or did not answer in time.
    Network(NetworkFailure),
    /// The server answered with a non-2xx status.
    Http,
    /// The server answered 2xx but rejected the operation.
    GraphQL,
    /// A response body or subscription frame could not be understood.
    Protocol,
    /// The subscription endpoint did not acknowledge `connection_init` in time.
    HandshakeTimeout,
    /// An established subscription connection went away.
    ConnectionLost,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(NetworkFailure::Timeout) => write!(f, "network timeout"),
            Self::Network(NetworkFailure::Unreachable) => write!(f, "network unreachable"),
            Self::Http => write!(f, "http error"),
            Self::GraphQL => write!(f, "graphql error"),
            Self::Protocol => write!(f, "protocol error"),
            Self::HandshakeTimeout => write!(f, "handshake timeout"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// A failure from any transport path, tagged with its [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
    path: Option<String>,
    detail: Option<String>,
}

impl NormalizedError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            path: None,
            detail: None,
        }
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub(crate) fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path;
        self
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The primary message, preserved verbatim from the failure source.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The HTTP status code, for `Http` failures and rejected WebSocket upgrades.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Dotted path of the field that failed, for `GraphQL` failures.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Underlying detail (error source chain, extra GraphQL errors).
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Whether the per-call timeout expired.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Network(NetworkFailure::Timeout)
    }

    /// Whether repeating the call could plausibly succeed.
    ///
    /// Advice only: the transport never retries, and callers must not
    /// repeat non-idempotent mutations on this basis alone.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Network(_) | ErrorKind::ConnectionLost | ErrorKind::HandshakeTimeout => true,
            ErrorKind::Http => self.status_code.is_some_and(|s| s >= 500 || s == 429),
            ErrorKind::GraphQL | ErrorKind::Protocol => false,
        }
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Network(NetworkFailure::Timeout) => {
                write!(f, "Request timed out: {}", self.message)
            }
            ErrorKind::Network(NetworkFailure::Unreachable) => {
                write!(f, "Unraid API unreachable: {}", self.message)
            }
            ErrorKind::Http => match self.status_code {
                Some(status) => write!(f, "HTTP {status}: {}", self.message),
                None => write!(f, "HTTP error: {}", self.message),
            },
            ErrorKind::GraphQL => {
                write!(f, "GraphQL error: {}", self.message)?;
                if let Some(ref path) = self.path {
                    write!(f, " (at {path})")?;
                }
                Ok(())
            }
            ErrorKind::Protocol => write!(f, "Protocol error: {}", self.message),
            ErrorKind::HandshakeTimeout => {
                write!(f, "Subscription handshake timed out: {}", self.message)
            }
            ErrorKind::ConnectionLost => write!(f, "Connection lost: {}", self.message),
        }
    }
}

impl std::error::Error for NormalizedError {}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, NormalizedError>;
