use std::time::Duration;

use async_trait::async_trait;
use common_types::Event;
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const SYMBOLICATION_BATCHES: &str = "ingest_symbolication_batches_total";
const SYMBOLICATION_ITEM_ERRORS: &str = "ingest_symbolication_item_errors_total";

#[derive(Error, Debug)]
pub enum SymbolicatorError {
    #[error("symbolicator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("symbolicator responded with status {0}")]
    Status(u16),
}

/// Why a single event in an otherwise successful batch was not rewritten.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("symbolicator failed to decode event: {0}")]
    Decode(String),
    #[error("symbolicator returned no event")]
    Missing,
}

/// Result of one symbolicator round trip. `succeeded` is false when the
/// whole batch failed and `items` is then empty.
#[derive(Debug)]
pub struct BatchOutcome {
    pub succeeded: bool,
    pub items: Vec<(Uuid, Result<Event, ItemError>)>,
}

#[async_trait]
pub trait Symbolicate: Send + Sync {
    async fn symbolicate(
        &self,
        app_id: Uuid,
        events: &[Event],
    ) -> Result<Vec<(Uuid, Result<Event, ItemError>)>, SymbolicatorError>;
}

#[derive(Serialize)]
struct SymbolicateRequest<'a> {
    app_id: Uuid,
    events: &'a [Event],
}

#[derive(Deserialize)]
struct SymbolicateResponse {
    events: Vec<SymbolicatedItem>,
}

#[derive(Deserialize)]
struct SymbolicatedItem {
    id: Uuid,
    #[serde(default)]
    event: Option<Event>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the external symbolicator service.
pub struct HttpSymbolicator {
    client: Client,
    endpoint: String,
}

impl HttpSymbolicator {
    pub fn new(origin: &str, timeout: Duration) -> Result<Self, SymbolicatorError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/symbolicate", origin.trim_end_matches('/'));
        info!(endpoint = %endpoint, "symbolicator client initialized");
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Symbolicate for HttpSymbolicator {
    async fn symbolicate(
        &self,
        app_id: Uuid,
        events: &[Event],
    ) -> Result<Vec<(Uuid, Result<Event, ItemError>)>, SymbolicatorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SymbolicateRequest { app_id, events })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SymbolicatorError::Status(status.as_u16()));
        }

        let body: SymbolicateResponse = response.json().await?;

        Ok(body
            .events
            .into_iter()
            .map(|item| {
                let result = match (item.event, item.error) {
                    (_, Some(error)) => Err(ItemError::Decode(error)),
                    (Some(event), None) => Ok(event),
                    (None, None) => Err(ItemError::Missing),
                };
                (item.id, result)
            })
            .collect())
    }
}

/// Sends one batch. Failure of the batch as a whole is reported through the
/// outcome, never as an error.
pub async fn symbolicate_batch(
    symbolicator: &dyn Symbolicate,
    app_id: Uuid,
    batch: &[Event],
) -> BatchOutcome {
    match symbolicator.symbolicate(app_id, batch).await {
        Ok(items) => {
            counter!(SYMBOLICATION_BATCHES, "outcome" => "success").increment(1);
            BatchOutcome {
                succeeded: true,
                items,
            }
        }
        Err(e) => {
            counter!(SYMBOLICATION_BATCHES, "outcome" => "failure").increment(1);
            error!(%app_id, batch_size = batch.len(), error = %e, "symbolication batch failed, events left as is");
            BatchOutcome {
                succeeded: false,
                items: Vec::new(),
            }
        }
    }
}

/// Totals of a dispatch across all batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub batches: usize,
    pub failed_batches: usize,
    pub item_errors: usize,
}

/// Symbolicates `candidates` in batches of `batch_size`, returning the
/// rewritten events. Failed batches and failed items are skipped.
pub async fn dispatch(
    symbolicator: &dyn Symbolicate,
    app_id: Uuid,
    candidates: &[Event],
    batch_size: usize,
) -> (Vec<Event>, DispatchReport) {
    let mut rewritten = Vec::with_capacity(candidates.len());
    let mut report = DispatchReport::default();

    for batch in candidates.chunks(batch_size.max(1)) {
        report.batches += 1;
        let outcome = symbolicate_batch(symbolicator, app_id, batch).await;
        if !outcome.succeeded {
            report.failed_batches += 1;
            continue;
        }

        for (id, result) in outcome.items {
            match result {
                Ok(event) => rewritten.push(event),
                Err(e) => {
                    counter!(SYMBOLICATION_ITEM_ERRORS).increment(1);
                    warn!(event_id = %id, error = %e, "failed to symbolicate event");
                    report.item_errors += 1;
                }
            }
        }
    }

    (rewritten, report)
}
