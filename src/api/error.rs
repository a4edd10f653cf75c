//! Mapping of core errors onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::Error;

/// An error answered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Auth(_) | Error::SessionClosed => StatusCode::UNAUTHORIZED,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        Error::Transport(_) => StatusCode::BAD_GATEWAY,
        Error::Install(_) | Error::Query(_) | Error::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "Request rejected");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, NotFoundError, TransportError};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (Error::Auth(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED),
            (Error::SessionClosed, StatusCode::UNAUTHORIZED),
            (Error::NotFound(NotFoundError { record: "猫".into() }), StatusCode::NOT_FOUND),
            (Error::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (Error::Transport(TransportError::Timeout), StatusCode::BAD_GATEWAY),
            (Error::Task("panicked".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn test_message_is_error_display() {
        let err = ApiError::from(Error::NotFound(NotFoundError { record: "word-9".into() }));
        assert_eq!(err.message, "record not found: word-9");
    }
}
