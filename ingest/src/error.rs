use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common_geoip::GeoIpError;
use common_types::ValidationError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::bucket::BucketError;
use crate::ledger::LedgerError;
use crate::writer::WriterError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no msr-req-id header")]
    MissingRequestId,

    #[error("msr-req-id {0:?} is not a valid UUID")]
    InvalidRequestId(String),

    #[error("app {0} not found")]
    AppNotFound(Uuid),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("payload must contain at least one event")]
    NoEvents,

    #[error("payload of {size} bytes exceeds maximum allowed size of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("event {id} is invalid: {source}")]
    InvalidEvent {
        id: Uuid,
        #[source]
        source: ValidationError,
    },

    #[error("attachment {id} is invalid: {source}")]
    InvalidAttachment {
        id: Uuid,
        #[source]
        source: ValidationError,
    },

    #[error("duplicate event id {0} in payload")]
    DuplicateEventId(Uuid),

    #[error("events declare attachments but payload has no blobs")]
    MissingBlobs,

    #[error("request is already being processed, retry after {retry_after} seconds")]
    DuplicatePending { retry_after: u64 },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("bucketing error: {0}")]
    Bucket(#[from] BucketError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("geo lookup error: {0}")]
    GeoIp(#[from] GeoIpError),

    #[error("event writer error: {0}")]
    Writer(#[from] WriterError),
}

impl IngestError {
    fn status(&self) -> StatusCode {
        match self {
            IngestError::MissingRequestId
            | IngestError::InvalidRequestId(_)
            | IngestError::AppNotFound(_)
            | IngestError::Malformed(_)
            | IngestError::NoEvents
            | IngestError::PayloadTooLarge { .. }
            | IngestError::InvalidEvent { .. }
            | IngestError::InvalidAttachment { .. }
            | IngestError::DuplicateEventId(_)
            | IngestError::MissingBlobs => StatusCode::BAD_REQUEST,
            IngestError::DuplicatePending { .. } => StatusCode::TOO_MANY_REQUESTS,
            IngestError::Ledger(_)
            | IngestError::Bucket(_)
            | IngestError::Database(_)
            | IngestError::GeoIp(_)
            | IngestError::Writer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            IngestError::PayloadTooLarge { .. } => "payload too large",
            IngestError::DuplicatePending { .. } => {
                "a previous accepted request is in progress, retry after some time"
            }
            IngestError::AppNotFound(_) => "app not found",
            IngestError::InvalidEvent { .. }
            | IngestError::InvalidAttachment { .. }
            | IngestError::DuplicateEventId(_)
            | IngestError::MissingBlobs => "failed to validate events",
            IngestError::MissingRequestId
            | IngestError::InvalidRequestId(_)
            | IngestError::Malformed(_)
            | IngestError::NoEvents => "failed to parse events payload",
            _ => "failed to ingest events",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = if status.is_server_error() {
            tracing::error!(error = ?self, status = %status, "Ingest request failed");
            json!({ "error": self.message() })
        } else {
            tracing::warn!(error = %self, status = %status, "Ingest request rejected");
            json!({ "error": self.message(), "details": self.to_string() })
        };

        let mut response = (status, Json(body)).into_response();

        if let IngestError::DuplicatePending { retry_after } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after),
            );
        }

        response
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
