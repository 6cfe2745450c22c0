use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_types::{AppFilter, Attachment, Attribute, IssueKind, LaunchKind};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("clickhouse query failed: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),
    #[error("failed to decode {column} of event {id}: {source}")]
    Decode {
        id: Uuid,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Which app versions a query covers, relative to the filter's selection.
/// Without a selection every version counts as selected and none as
/// unselected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionScope {
    Selected,
    Unselected,
    All,
}

/// An exception or ANR event as served back to dashboards.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: IssueKind,
    pub attribute: Attribute,
    pub payload: Value,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JourneyStep {
    Screen(String),
    Issue { kind: IssueKind, fingerprint: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyEvent {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub step: JourneyStep,
}

/// Distinct session counts. Perceived variants only count issues that
/// happened while the app was in the foreground.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub sessions: u64,
    pub crash_sessions: u64,
    pub perceived_crash_sessions: u64,
    pub anr_sessions: u64,
    pub perceived_anr_sessions: u64,
}

/// Read side of the columnar event store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events of one issue group in the filter's pagination direction,
    /// at most `filter.extended_limit()` of them, strictly past the keyset
    /// when there is one.
    async fn issue_events(
        &self,
        filter: &AppFilter,
        kind: IssueKind,
        fingerprint: &str,
    ) -> Result<Vec<IssueEvent>, QueryError>;

    /// Ids of every event in an issue group, ascending by time.
    async fn issue_event_ids(
        &self,
        app_id: Uuid,
        kind: IssueKind,
        fingerprint: &str,
    ) -> Result<Vec<Uuid>, QueryError>;

    /// Lifecycle and issue events in timestamp order.
    async fn journey_events(&self, filter: &AppFilter) -> Result<Vec<JourneyEvent>, QueryError>;

    async fn session_counts(
        &self,
        filter: &AppFilter,
        scope: VersionScope,
    ) -> Result<SessionCounts, QueryError>;

    /// 95th percentile of launch durations inside the kind's bounds,
    /// `None` when no launch qualifies.
    async fn launch_p95(
        &self,
        filter: &AppFilter,
        kind: LaunchKind,
        scope: VersionScope,
    ) -> Result<Option<f64>, QueryError>;

    async fn health_check(&self) -> Result<(), QueryError>;
}
