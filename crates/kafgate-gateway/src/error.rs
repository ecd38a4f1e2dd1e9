//! Gateway error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use kafgate_core::error::{ConnectorError, ErrorKind};

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The request body could not be read.
    #[error("failed to read request input: {0}")]
    BodyRead(String),

    /// The connector rejected the request or the reply failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Listener or server I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// The HTTP status this error maps to: timeout is a gateway timeout,
    /// every other connector outcome a bad gateway, local failures an
    /// internal error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BodyRead(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connector(err) => match err.kind() {
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::BodyRead(_) => "Failed to read request input",
            Self::Connector(err) if err.is_timeout() => "timeout",
            Self::Connector(_) => "transport error",
            Self::Io(_) => "internal error",
        }
    }
}

/// JSON body for error responses.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.message().to_owned(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
