use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use common_metrics::timing_guard;
use metrics::counter;
use tracing::{debug, info};
use uuid::Uuid;

use crate::apps::{self, App};
use crate::attachments::{upload_attachments, AttachmentStore};
use crate::bucket::{bucket_events, BucketOptions, BucketReport};
use crate::error::{IngestError, Result};
use crate::inet::{client_inet, ResolveInet};
use crate::ledger::{Ledger, LedgerError, PendingGuard, RequestCounts, RequestStatus};
use crate::request::IngestRequest;
use crate::symbolicator::{dispatch, Symbolicate};
use crate::writer::EventWriter;

const INGEST_REQUESTS: &str = "ingest_requests_total";
const INGEST_DURATION: &str = "ingest_request_duration_ms";

/// Knobs of the ingest pipeline that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub max_batch_size_bytes: usize,
    pub retry_after_secs: u64,
    pub symbolicator_batch_size: usize,
    pub bucket: BucketOptions,
}

/// Everything one ingest request needs from the outside world.
#[derive(Clone)]
pub struct Pipeline {
    pub ledger: Ledger,
    pub writer: Arc<dyn EventWriter>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub symbolicator: Option<Arc<dyn Symbolicate>>,
    pub inet: Arc<dyn ResolveInet>,
    pub settings: IngestSettings,
}

/// How a request was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// Processed now.
    Processed {
        counts: RequestCounts,
        bucketed: BucketReport,
    },
    /// An earlier attempt with the same request id already completed.
    AlreadyDone,
}

/// Raw pieces of an ingest request as received over HTTP.
pub struct RawRequest {
    pub id: Uuid,
    pub app_id: Uuid,
    pub content_type: String,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
}

impl Pipeline {
    /// Runs a request end to end. The ledger row stays `pending` only while
    /// the request is in flight: any failure, including cancellation,
    /// removes it so the client can retry.
    pub async fn ingest(&self, raw: RawRequest) -> Result<Accepted> {
        let timer = timing_guard(INGEST_DURATION);

        let app = apps::find_app(self.ledger.pool(), raw.app_id)
            .await?
            .ok_or(IngestError::AppNotFound(raw.app_id))?;

        // Claim first and look at the existing row only on conflict, so an
        // attempt finishing concurrently is seen as done.
        match self.ledger.start(raw.id, raw.app_id).await {
            Ok(()) => {}
            Err(LedgerError::DuplicateRequest { .. }) => {
                return match self.ledger.status(raw.id, raw.app_id).await? {
                    Some(RequestStatus::Done) => {
                        info!(request_id = %raw.id, app_id = %raw.app_id, "request already processed");
                        counter!(INGEST_REQUESTS, "outcome" => "known").increment(1);
                        timer.label("outcome", "known").fin();
                        Ok(Accepted::AlreadyDone)
                    }
                    // a pending row, or one removed by a failed attempt since
                    Some(RequestStatus::Pending) | None => Err(self.duplicate_pending()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        let guard = PendingGuard::new(self.ledger.clone(), raw.id, raw.app_id);

        match self.process(&app, raw).await {
            Ok(accepted) => {
                guard.disarm();
                counter!(INGEST_REQUESTS, "outcome" => "accepted").increment(1);
                timer.label("outcome", "accepted").fin();
                Ok(accepted)
            }
            Err(e) => {
                guard.cleanup().await;
                counter!(INGEST_REQUESTS, "outcome" => "failed").increment(1);
                timer.label("outcome", "failed").fin();
                Err(e)
            }
        }
    }

    fn duplicate_pending(&self) -> IngestError {
        counter!(INGEST_REQUESTS, "outcome" => "pending").increment(1);
        IngestError::DuplicatePending {
            retry_after: self.settings.retry_after_secs,
        }
    }

    async fn process(&self, app: &App, raw: RawRequest) -> Result<Accepted> {
        let mut request =
            IngestRequest::parse(raw.id, raw.app_id, &raw.content_type, raw.body).await?;
        request.validate(self.settings.max_batch_size_bytes)?;

        let inet = client_inet(self.inet.as_ref(), raw.client_ip)?;
        request.infuse_inet(&inet);

        self.symbolicate(&mut request).await;
        request.compute_fingerprints();

        if request.has_attachments() {
            let uploaded = upload_attachments(self.attachments.as_ref(), &mut request).await;
            debug!(request_id = %request.id, uploaded, "uploaded attachments");
        }

        self.writer.write(&request.events).await?;

        let counts = request.counts();
        let mut tx = self.ledger.pool().begin().await?;

        let bucketed = bucket_events(&mut *tx, app.id, &request.events, self.settings.bucket).await?;

        if !app.onboarded {
            if let Some(first) = request.events.first() {
                let attribute = &first.attribute;
                if apps::onboard(
                    &mut *tx,
                    app.id,
                    &attribute.app_unique_id,
                    &attribute.os_name,
                    &attribute.app_version,
                )
                .await?
                {
                    info!(app_id = %app.id, unique_identifier = %attribute.app_unique_id, "app onboarded");
                }
            }
        }

        Ledger::finish(&mut *tx, request.id, request.app_id, &counts).await?;
        tx.commit().await?;

        info!(
            request_id = %request.id,
            app_id = %request.app_id,
            events = counts.event_count,
            sessions = counts.session_count,
            groups_created = bucketed.created,
            "request accepted"
        );

        Ok(Accepted::Processed { counts, bucketed })
    }

    async fn symbolicate(&self, request: &mut IngestRequest) {
        let Some(symbolicator) = &self.symbolicator else {
            return;
        };

        let candidates = request.symbolication_candidates();
        if candidates.is_empty() {
            return;
        }

        request.symbolication_attempts += 1;
        let (rewritten, report) = dispatch(
            symbolicator.as_ref(),
            request.app_id,
            &candidates,
            self.settings.symbolicator_batch_size,
        )
        .await;
        let replaced = request.apply_symbolicated(rewritten);

        debug!(
            request_id = %request.id,
            candidates = candidates.len(),
            replaced,
            failed_batches = report.failed_batches,
            item_errors = report.item_errors,
            "symbolication finished"
        );
    }
}
