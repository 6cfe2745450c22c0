use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two kinds of issues events are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Exception,
    Anr,
}

impl IssueKind {
    pub fn table(&self) -> &'static str {
        match self {
            IssueKind::Exception => "exception_groups",
            IssueKind::Anr => "anr_groups",
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            IssueKind::Exception => crate::event::TYPE_EXCEPTION,
            IssueKind::Anr => crate::event::TYPE_ANR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Exception => "exception",
            IssueKind::Anr => "anr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IssueGroup {
    pub id: Uuid,
    pub app_id: Uuid,
    pub fingerprint: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub message: String,
    pub method_name: String,
    pub file_name: String,
    pub line_number: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssueGroup {
    /// Short human readable name, `type@file` when the file is known.
    pub fn title(&self) -> String {
        if self.file_name.is_empty() {
            self.kind.clone()
        } else {
            format!("{}@{}", self.kind, self.file_name)
        }
    }
}
