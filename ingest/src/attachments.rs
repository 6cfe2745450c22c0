use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::SdkError,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AttachmentsConfig;
use crate::request::IngestRequest;

const ATTACHMENT_UPLOAD_BODY_SIZE_BYTES: &str = "ingest_attachment_upload_body_size_bytes";
const ATTACHMENT_UPLOAD_DURATION_SECONDS: &str = "ingest_attachment_upload_duration_seconds";
const ATTACHMENT_UPLOAD_TOTAL: &str = "ingest_attachment_upload_total";

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to upload {key}: {reason}")]
    UploadFailed { key: String, reason: String },
}

/// Object storage for attachment blobs.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Stores `data` under `key` and returns its location.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        original_file_name: &str,
    ) -> Result<String, AttachmentError>;
}

/// Extract error reason from SdkError for metrics labeling
fn extract_error_reason<E: std::fmt::Debug>(err: &SdkError<E>) -> String {
    match err {
        SdkError::ConstructionFailure(_) => "construction_failure".to_string(),
        SdkError::TimeoutError(_) => "timeout".to_string(),
        SdkError::DispatchFailure(_) => "connection_error".to_string(),
        SdkError::ResponseError(err) => {
            format!("response_error_{}", err.raw().status().as_u16())
        }
        SdkError::ServiceError(err) => {
            format!("status_{}", err.raw().status().as_u16())
        }
        _ => "unknown".to_string(),
    }
}

#[derive(Clone)]
pub struct S3AttachmentStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3AttachmentStore {
    /// Uses the default AWS credential chain unless explicit credentials
    /// are configured.
    pub async fn new(config: &AttachmentsConfig) -> Self {
        let region = Region::new(config.region.clone());

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config)
            .region(region)
            .force_path_style(true);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "env");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            bucket = config.bucket,
            endpoint = config.endpoint,
            "attachment store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        }
    }
}

#[async_trait]
impl AttachmentStore for S3AttachmentStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        original_file_name: &str,
    ) -> Result<String, AttachmentError> {
        histogram!(ATTACHMENT_UPLOAD_BODY_SIZE_BYTES).record(data.len() as f64);

        let start = Instant::now();
        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .metadata("original_file_name", original_file_name);
        if !content_type.is_empty() {
            put = put.content_type(content_type);
        }
        let result = put.send().await;

        histogram!(ATTACHMENT_UPLOAD_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        match result {
            Ok(_) => {
                counter!(ATTACHMENT_UPLOAD_TOTAL, "outcome" => "success", "reason" => "ok")
                    .increment(1);
                Ok(location(
                    self.endpoint.as_deref(),
                    &self.bucket,
                    &self.region,
                    key,
                ))
            }
            Err(e) => {
                let reason = extract_error_reason(&e);
                counter!(ATTACHMENT_UPLOAD_TOTAL, "outcome" => "error", "reason" => reason.clone())
                    .increment(1);
                Err(AttachmentError::UploadFailed {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Public location of an uploaded object.
pub fn location(endpoint: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/')),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpeg",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "application/json" => ".json",
        "text/plain" => ".txt",
        _ => "",
    }
}

/// `<attachment id><ext>`, ext taken from the file name when it has one.
pub fn object_key(id: uuid::Uuid, file_name: &str, content_type: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| extension_for_content_type(content_type).to_string());
    format!("{id}{ext}")
}

/// Uploads every attachment that has a blob. Failures leave the attachment
/// without a key and never fail the request. Returns the number uploaded.
pub async fn upload_attachments(store: &dyn AttachmentStore, request: &mut IngestRequest) -> usize {
    let mut uploaded = 0;
    let request_id = request.id;

    for event in &mut request.events {
        for attachment in &mut event.attachments {
            let Some(blob) = request.blobs.get(&attachment.id) else {
                warn!(%request_id, attachment_id = %attachment.id, "no blob for attachment");
                continue;
            };

            let key = object_key(attachment.id, &blob.file_name, &blob.content_type);
            match store
                .put(&key, blob.data.clone(), &blob.content_type, &blob.file_name)
                .await
            {
                Ok(location) => {
                    attachment.key = key;
                    attachment.location = location;
                    uploaded += 1;
                }
                Err(e) => {
                    error!(%request_id, attachment_id = %attachment.id, error = %e, "failed to upload attachment");
                }
            }
        }
    }

    uploaded
}
