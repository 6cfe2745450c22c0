use chrono::{DateTime, Utc};
use common_types::{Event, IssueKind, IssueSignature};
use metrics::counter;
use sqlx::PgConnection;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const BUCKETED_EVENTS: &str = "ingest_bucketed_events_total";

#[derive(Error, Debug)]
pub enum BucketError {
    #[error("failed to upsert {kind} group for fingerprint {fingerprint}: {source}")]
    Upsert {
        kind: &'static str,
        fingerprint: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Outcome of bucketing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketReport {
    pub created: usize,
    pub touched: usize,
    pub skipped: usize,
    /// `(event id, group id)` for every bucketed event.
    pub memberships: Vec<(Uuid, Uuid)>,
    /// Set when bucketing stopped early after creating a group.
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketOptions {
    /// Stop processing the batch once the first new group is created.
    pub stop_after_first_new_group: bool,
}

#[derive(sqlx::FromRow)]
struct UpsertedGroup {
    id: Uuid,
    inserted: bool,
}

/// Groups unhandled exceptions and ANRs by fingerprint. Runs on the
/// caller's transaction so a failure rolls back all grouping effects of the
/// batch.
pub async fn bucket_events(
    conn: &mut PgConnection,
    app_id: Uuid,
    events: &[Event],
    options: BucketOptions,
) -> Result<BucketReport, BucketError> {
    let mut report = BucketReport::default();

    for event in events {
        let kind = if event.is_unhandled_exception() {
            IssueKind::Exception
        } else if event.is_anr() {
            IssueKind::Anr
        } else {
            continue;
        };

        let Some(signature) = event.issue_signature() else {
            continue;
        };

        if signature.fingerprint.is_empty() {
            warn!(event_id = %event.id, kind = kind.as_str(), "event has no fingerprint, skipping bucketing");
            counter!(BUCKETED_EVENTS, "kind" => kind.as_str(), "outcome" => "skipped").increment(1);
            report.skipped += 1;
            continue;
        }

        let group = upsert_group(&mut *conn, kind, app_id, &signature, event.timestamp).await?;
        report.memberships.push((event.id, group.id));

        if group.inserted {
            debug!(event_id = %event.id, group_id = %group.id, kind = kind.as_str(), "created issue group");
            counter!(BUCKETED_EVENTS, "kind" => kind.as_str(), "outcome" => "created").increment(1);
            report.created += 1;

            if options.stop_after_first_new_group {
                report.stopped_early = true;
                return Ok(report);
            }
        } else {
            counter!(BUCKETED_EVENTS, "kind" => kind.as_str(), "outcome" => "touched").increment(1);
            report.touched += 1;
        }
    }

    Ok(report)
}

/// Inserts a group or widens the seen window of the existing one. The
/// window only ever grows, so touching it twice with the same event is a
/// no-op.
async fn upsert_group(
    conn: &mut PgConnection,
    kind: IssueKind,
    app_id: Uuid,
    signature: &IssueSignature,
    timestamp: DateTime<Utc>,
) -> Result<UpsertedGroup, BucketError> {
    let table = kind.table();
    let query = format!(
        r#"
INSERT INTO {table} (id, app_id, fingerprint, type, message, method_name, file_name, line_number, first_seen, last_seen)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
ON CONFLICT (app_id, fingerprint) DO UPDATE
SET
    first_seen = LEAST({table}.first_seen, EXCLUDED.first_seen),
    last_seen = GREATEST({table}.last_seen, EXCLUDED.last_seen),
    updated_at = NOW()
RETURNING id, (xmax = 0) AS inserted
        "#
    );

    sqlx::query_as::<_, UpsertedGroup>(&query)
        .bind(Uuid::now_v7())
        .bind(app_id)
        .bind(&signature.fingerprint)
        .bind(&signature.kind)
        .bind(&signature.message)
        .bind(&signature.method_name)
        .bind(&signature.file_name)
        .bind(signature.line_number)
        .bind(timestamp)
        .fetch_one(conn)
        .await
        .map_err(|source| BucketError::Upsert {
            kind: kind.as_str(),
            fingerprint: signature.fingerprint.clone(),
            source,
        })
}
