//! Connector error taxonomy.

use thiserror::Error;

/// Errors surfaced by the connector and its collaborators.
///
/// Every variant belongs to exactly one [`ErrorKind`]; callers that only
/// care about the category (the HTTP gateway, for one) match on
/// [`ConnectorError::kind`] instead of the variant.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The message failed local checks before reaching the broker.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing serializer, unknown endpoint or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A broker write failed or a consumer could not be set up.
    #[error("transport error: {0}")]
    Transport(String),

    /// The pending entry expired before a reply arrived.
    #[error("request timed out waiting for a reply")]
    Timeout,

    /// The connector is shutting down or already closed.
    #[error("connector is closed")]
    Closed,

    /// Shutdown completed with one or more sub-failures.
    #[error("close failed: {}", .0.join("; "))]
    CloseFailed(Vec<String>),
}

/// The category of a [`ConnectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Config,
    Transport,
    Timeout,
    Closed,
}

impl ConnectorError {
    /// Returns the error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) | Self::CloseFailed(_) => ErrorKind::Transport,
            Self::Timeout => ErrorKind::Timeout,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// True for the timeout outcome of a pending reply.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
