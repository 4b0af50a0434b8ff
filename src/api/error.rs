//! API error handling

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::error::{Error, ErrorKind};
use crate::models::ErrorResponse;

/// Error returned by every handler
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(err) => status_of(err.kind()),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError | ErrorKind::InvalidSubnet => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::NameConflict
        | ErrorKind::Conflict
        | ErrorKind::ContainerRunning
        | ErrorKind::NetworkInUse
        | ErrorKind::AddressPoolExhausted => StatusCode::CONFLICT,
        ErrorKind::StartFailed | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::RuntimeTimeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Core(Error::NetworkInUse { containers, .. }) => {
                ErrorResponse::new(ErrorKind::NetworkInUse.as_str(), self.to_string())
                    .with_details(json!({ "containers": containers }))
            }
            ApiError::Core(err) => ErrorResponse::new(err.kind().as_str(), err.to_string()),
            ApiError::BadRequest(msg) => {
                ErrorResponse::new(ErrorKind::ValidationError.as_str(), msg.clone())
            }
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        }

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::validation("x"), StatusCode::BAD_REQUEST),
            (Error::InvalidSubnet("x".into()), StatusCode::BAD_REQUEST),
            (Error::not_found("container x"), StatusCode::NOT_FOUND),
            (Error::NameConflict("x".into()), StatusCode::CONFLICT),
            (Error::ContainerRunning("x".into()), StatusCode::CONFLICT),
            (Error::AddressPoolExhausted("x".into()), StatusCode::CONFLICT),
            (Error::StartFailed("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::RuntimeTimeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
