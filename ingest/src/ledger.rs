use metrics::counter;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

const LEDGER_DUPLICATES: &str = "ingest_ledger_duplicates_total";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("request {id} for app {app_id} already exists")]
    DuplicateRequest { id: Uuid, app_id: Uuid },
    #[error("request {id} for app {app_id} is not pending")]
    NotPending { id: Uuid, app_id: Uuid },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "event_req_status", rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Done,
}

/// Summary recorded on the ledger row once a request completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub event_count: i32,
    pub attachment_count: i32,
    pub session_count: i32,
    pub bytes_in: i64,
    pub symbolication_attempts: i32,
}

/// Idempotency record of ingest requests, one row per (request id, app id).
/// Rows move `pending -> done`; only pending rows are ever deleted.
#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a pending row. A second start for the same key fails with
    /// `DuplicateRequest` whatever state the existing row is in; callers
    /// read [`Ledger::status`] to tell a finished attempt from one in flight.
    pub async fn start(&self, id: Uuid, app_id: Uuid) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
INSERT INTO event_reqs (id, app_id, status)
VALUES ($1, $2, 'pending')
            "#,
        )
        .bind(id)
        .bind(app_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::DuplicateRequest { id, app_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `None` when no attempt was ever recorded.
    pub async fn status(&self, id: Uuid, app_id: Uuid) -> Result<Option<RequestStatus>, LedgerError> {
        let status = sqlx::query_scalar::<_, RequestStatus>(
            r#"
SELECT status FROM event_reqs WHERE id = $1 AND app_id = $2
            "#,
        )
        .bind(id)
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(status) = status {
            let label = match status {
                RequestStatus::Pending => "pending",
                RequestStatus::Done => "done",
            };
            counter!(LEDGER_DUPLICATES, "status" => label).increment(1);
        }

        Ok(status)
    }

    /// Marks the row done inside the caller's transaction.
    pub async fn finish(
        conn: &mut PgConnection,
        id: Uuid,
        app_id: Uuid,
        counts: &RequestCounts,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
UPDATE event_reqs
SET
    status = 'done',
    event_count = $3,
    attachment_count = $4,
    session_count = $5,
    bytes_in = $6,
    symbolication_attempts_count = $7,
    updated_at = NOW()
WHERE id = $1 AND app_id = $2 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(app_id)
        .bind(counts.event_count)
        .bind(counts.attachment_count)
        .bind(counts.session_count)
        .bind(counts.bytes_in)
        .bind(counts.symbolication_attempts)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotPending { id, app_id });
        }

        Ok(())
    }

    /// Deletes the row if it is still pending, so a failed request can be
    /// retried straight away. Returns whether a row was removed.
    pub async fn cleanup(&self, id: Uuid, app_id: Uuid) -> Result<bool, LedgerError> {
        cleanup_pending(&self.pool, id, app_id).await
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) async fn cleanup_pending(
    pool: &PgPool,
    id: Uuid,
    app_id: Uuid,
) -> Result<bool, LedgerError> {
    let result = sqlx::query(
        r#"
DELETE FROM event_reqs WHERE id = $1 AND app_id = $2 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(app_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Removes the pending row of an unfinished request when dropped, including
/// when the handling future is cancelled mid-flight.
pub struct PendingGuard {
    ledger: Ledger,
    id: Uuid,
    app_id: Uuid,
    armed: bool,
}

impl PendingGuard {
    pub fn new(ledger: Ledger, id: Uuid, app_id: Uuid) -> Self {
        Self {
            ledger,
            id,
            app_id,
            armed: true,
        }
    }

    /// The request finished, the row must stay.
    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Cleans up right away instead of on drop.
    pub async fn cleanup(mut self) {
        self.armed = false;
        if let Err(e) = self.ledger.cleanup(self.id, self.app_id).await {
            tracing::error!(request_id = %self.id, app_id = %self.app_id, error = %e, "failed to clean up pending request");
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(request_id = %self.id, "no runtime to clean up pending request");
            return;
        };

        let pool = self.ledger.pool().clone();
        let (id, app_id) = (self.id, self.app_id);
        handle.spawn(async move {
            if let Err(e) = cleanup_pending(&pool, id, app_id).await {
                tracing::error!(request_id = %id, app_id = %app_id, error = %e, "failed to clean up pending request");
            }
        });
    }
}
