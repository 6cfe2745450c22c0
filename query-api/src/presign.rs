use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    Client,
};
use common_types::Attachment;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::AttachmentsConfig;

const ATTACHMENT_PRESIGN_TOTAL: &str = "query_attachment_presign_total";

#[derive(Error, Debug)]
pub enum PresignError {
    #[error("invalid presigning config: {0}")]
    Config(String),
    #[error("failed to presign {key}: {message}")]
    Sign { key: String, message: String },
}

/// Hands out time limited download URLs for stored attachments.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn presign(&self, key: &str) -> Result<String, PresignError>;
}

pub struct S3UrlSigner {
    client: Client,
    bucket: String,
    expiry: Duration,
}

impl S3UrlSigner {
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

        info!(
            bucket = config.bucket,
            expiry_secs = config.url_expiry_secs,
            "attachment url signer initialized"
        );

        Self {
            client: Client::from_conf(s3_config_builder.build()),
            bucket: config.bucket.clone(),
            expiry: Duration::from_secs(config.url_expiry_secs),
        }
    }
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    async fn presign(&self, key: &str) -> Result<String, PresignError> {
        let presigning =
            PresigningConfig::expires_in(self.expiry).map_err(|e| PresignError::Config(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| PresignError::Sign {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(request.uri().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedAttachment {
    #[serde(flatten)]
    pub attachment: Attachment,
    pub url: String,
}

/// Pairs every attachment with a download URL. Attachments that never made
/// it to storage, or fail to sign, are served without one.
pub async fn sign_attachments(
    signer: &dyn UrlSigner,
    attachments: Vec<Attachment>,
) -> Vec<SignedAttachment> {
    let mut signed = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let url = if attachment.key.is_empty() {
            String::new()
        } else {
            match signer.presign(&attachment.key).await {
                Ok(url) => {
                    counter!(ATTACHMENT_PRESIGN_TOTAL, "outcome" => "success").increment(1);
                    url
                }
                Err(e) => {
                    counter!(ATTACHMENT_PRESIGN_TOTAL, "outcome" => "failure").increment(1);
                    warn!(attachment_id = %attachment.id, error = %e, "failed to presign attachment");
                    String::new()
                }
            }
        };
        signed.push(SignedAttachment { attachment, url });
    }
    signed
}
