//! Mapping from crate errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::query::QueryError;
use crate::{Error, StoreError};

/// An [`Error`] on its way out as a JSON response:
/// `{ "error": "<code>", "message": "<detail>" }`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Query(QueryError::Syntax { .. }) => (StatusCode::BAD_REQUEST, "query_syntax"),
            Error::Query(QueryError::InvalidDepth(_) | QueryError::PathExceedsDepth { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_depth")
            }
            Error::Query(QueryError::UnknownType { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unknown_type")
            }
            Error::Json(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            Error::SchemaAdmin(_) | Error::Schema(_) => (StatusCode::UNPROCESSABLE_ENTITY, "schema"),
            Error::Unavailable(_) | Error::Store(StoreError::Conflict { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code, "request failed");
        } else {
            tracing::debug!(error = %self.0, code, "request rejected");
        }
        (status, Json(json!({ "error": code, "message": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_errors_map_to_client_codes() {
        let syntax = ApiError::from(QueryError::Syntax { position: 3, message: "x".into() });
        assert_eq!(syntax.status_and_code(), (StatusCode::BAD_REQUEST, "query_syntax"));

        let unknown = ApiError::from(QueryError::UnknownType { kind: "entity type", name: "X".into() });
        assert_eq!(unknown.status_and_code(), (StatusCode::UNPROCESSABLE_ENTITY, "unknown_type"));

        let busy = ApiError::from(StoreError::Conflict { attempts: 64 });
        assert_eq!(busy.status_and_code().0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
