use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationError;

pub const ATTACHMENT_TYPES: [&str; 3] = ["screenshot", "android_method_trace", "layout_snapshot"];

/// Metadata of a file shipped alongside an event. The bytes travel in a
/// `blob-<id>` multipart part; `key` and `location` are filled in once the
/// blob lands in object storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub location: String,
}

impl Attachment {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::Missing("attachment.name"));
        }

        if self.kind.is_empty() {
            return Err(ValidationError::Missing("attachment.type"));
        }

        if !ATTACHMENT_TYPES.contains(&self.kind.as_str()) {
            return Err(ValidationError::Invalid {
                field: "attachment.type",
                reason: format!("{:?} is not one of {:?}", self.kind, ATTACHMENT_TYPES),
            });
        }

        Ok(())
    }

    pub fn is_uploaded(&self) -> bool {
        !self.key.is_empty()
    }
}
