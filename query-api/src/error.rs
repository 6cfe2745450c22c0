use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common_types::FilterError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::QueryError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("app {0} not found")]
    AppNotFound(Uuid),

    #[error("{kind} group {id} not found")]
    GroupNotFound { kind: &'static str, id: Uuid },

    #[error("event store error: {0}")]
    Store(#[from] QueryError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Filter(_) => StatusCode::BAD_REQUEST,
            ApiError::AppNotFound(_) | ApiError::GroupNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ApiError::Filter(_) => "app filters request validation failed",
            ApiError::AppNotFound(_) => "app not found",
            ApiError::GroupNotFound { .. } => "issue group not found",
            ApiError::Store(_) | ApiError::Database(_) => "failed to serve request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = if status.is_server_error() {
            tracing::error!(error = ?self, status = %status, "Query request failed");
            json!({ "error": self.message() })
        } else {
            tracing::warn!(error = %self, status = %status, "Query request rejected");
            json!({ "error": self.message(), "details": self.to_string() })
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Filter(FilterError::ZeroLimit).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::GroupNotFound {
                kind: "anr",
                id: Uuid::nil()
            }
            .into_response()
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound)
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
