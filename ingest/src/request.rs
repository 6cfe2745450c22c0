use std::collections::{HashMap, HashSet};

use axum::http::HeaderMap;
use bytes::Bytes;
use common_geoip::Inet;
use common_types::{Event, LaunchAnomaly};
use futures::stream;
use multer::{parse_boundary, Multipart};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::ledger::RequestCounts;

pub const REQUEST_ID_HEADER: &str = "msr-req-id";
const EVENT_PART: &str = "event";
const BLOB_PART_PREFIX: &str = "blob-";

/// Raw bytes of an attachment, received as a `blob-<id>` part.
#[derive(Debug, Clone)]
pub struct Blob {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// One ingest batch, from parsing through to the ledger summary.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub id: Uuid,
    pub app_id: Uuid,
    pub events: Vec<Event>,
    pub blobs: HashMap<Uuid, Blob>,
    /// Sum of all event and blob part bytes.
    pub size: usize,
    pub symbolication_attempts: i32,
}

pub fn request_id(headers: &HeaderMap) -> Result<Uuid> {
    let raw = headers
        .get(REQUEST_ID_HEADER)
        .ok_or(IngestError::MissingRequestId)?
        .to_str()
        .map_err(|_| IngestError::InvalidRequestId("<non-ascii>".to_string()))?;

    Uuid::parse_str(raw.trim()).map_err(|_| IngestError::InvalidRequestId(raw.to_string()))
}

fn log_launch_anomaly(event: &Event, anomaly: LaunchAnomaly) {
    match anomaly {
        LaunchAnomaly::ColdAboveThreshold => {
            warn!(event_id = %event.id, "cold launch duration exceeds nominal threshold")
        }
        LaunchAnomaly::WarmAboveThreshold => {
            warn!(event_id = %event.id, "warm launch duration exceeds nominal threshold")
        }
        LaunchAnomaly::WarmWithoutVisibleUptime => {
            warn!(event_id = %event.id, "warm launch has no app visible uptime")
        }
    }
}

impl IngestRequest {
    /// Reads the multipart body. Launch durations are derived here, any
    /// anomaly is logged and the event kept.
    pub async fn parse(id: Uuid, app_id: Uuid, content_type: &str, body: Bytes) -> Result<Self> {
        let boundary = parse_boundary(content_type).map_err(|e| {
            IngestError::Malformed(format!("invalid boundary in Content-Type: {e}"))
        })?;

        let body_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
        let mut multipart = Multipart::new(body_stream, boundary);

        let mut request = IngestRequest {
            id,
            app_id,
            events: Vec::new(),
            blobs: HashMap::new(),
            size: 0,
            symbolication_attempts: 0,
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| IngestError::Malformed(format!("multipart parsing failed: {e}")))?
        {
            let field_name = field.name().unwrap_or_default().to_string();

            if field_name == EVENT_PART {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| IngestError::Malformed(format!("failed to read event: {e}")))?;

                if data.is_empty() {
                    return Err(IngestError::Malformed("event part is empty".to_string()));
                }
                request.size += data.len();

                let mut event: Event = serde_json::from_slice(&data)
                    .map_err(|e| IngestError::Malformed(format!("failed to decode event: {e}")))?;
                event.app_id = app_id;
                if let Some(anomaly) = event.compute_launch() {
                    log_launch_anomaly(&event, anomaly);
                }
                request.events.push(event);
            } else if let Some(raw_id) = field_name.strip_prefix(BLOB_PART_PREFIX) {
                let blob_id = Uuid::parse_str(raw_id).map_err(|_| {
                    IngestError::Malformed(format!("invalid attachment id {raw_id:?}"))
                })?;
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .map(|ct| ct.to_string())
                    .unwrap_or_default();
                let data = field.bytes().await.map_err(|e| {
                    IngestError::Malformed(format!("failed to read attachment {blob_id}: {e}"))
                })?;

                request.size += data.len();
                request.blobs.insert(
                    blob_id,
                    Blob {
                        id: blob_id,
                        file_name,
                        content_type,
                        data,
                    },
                );
            } else {
                debug!(field = field_name, "ignoring unknown multipart field");
            }
        }

        if request.events.is_empty() {
            return Err(IngestError::NoEvents);
        }

        Ok(request)
    }

    /// Size is checked first and independently of the events themselves.
    pub fn validate(&self, max_size: usize) -> Result<()> {
        if self.size >= max_size {
            return Err(IngestError::PayloadTooLarge {
                size: self.size,
                max: max_size,
            });
        }

        let mut seen = HashSet::with_capacity(self.events.len());
        for event in &self.events {
            if !seen.insert(event.id) {
                return Err(IngestError::DuplicateEventId(event.id));
            }

            event.validate().map_err(|source| IngestError::InvalidEvent {
                id: event.id,
                source,
            })?;

            for attachment in &event.attachments {
                attachment
                    .validate()
                    .map_err(|source| IngestError::InvalidAttachment {
                        id: attachment.id,
                        source,
                    })?;
            }
        }

        if self.has_attachments() && self.blobs.is_empty() {
            return Err(IngestError::MissingBlobs);
        }

        Ok(())
    }

    pub fn has_attachments(&self) -> bool {
        self.events.iter().any(Event::has_attachments)
    }

    pub fn infuse_inet(&mut self, inet: &Inet) {
        for event in &mut self.events {
            event.inet_ipv4 = inet.ipv4;
            event.inet_ipv6 = inet.ipv6;
            event.inet_country_code = inet.country_code.clone();
        }
    }

    pub fn symbolication_candidates(&self) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.needs_symbolication())
            .cloned()
            .collect()
    }

    /// Swaps rewritten events in by id. Returns how many were replaced.
    pub fn apply_symbolicated(&mut self, rewritten: Vec<Event>) -> usize {
        let positions: HashMap<Uuid, usize> = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();

        let mut replaced = 0;
        for event in rewritten {
            match positions.get(&event.id) {
                Some(&index) => {
                    self.events[index] = event;
                    replaced += 1;
                }
                None => {
                    warn!(event_id = %event.id, request_id = %self.id, "symbolicated event not found in request")
                }
            }
        }
        replaced
    }

    pub fn compute_fingerprints(&mut self) {
        for event in &mut self.events {
            event.compute_fingerprint();
        }
    }

    pub fn session_count(&self) -> usize {
        self.events
            .iter()
            .map(|e| e.session_id)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn counts(&self) -> RequestCounts {
        RequestCounts {
            event_count: i32::try_from(self.events.len()).unwrap_or(i32::MAX),
            attachment_count: i32::try_from(self.blobs.len()).unwrap_or(i32::MAX),
            session_count: i32::try_from(self.session_count()).unwrap_or(i32::MAX),
            bytes_in: i64::try_from(self.size).unwrap_or(i64::MAX),
            symbolication_attempts: self.symbolication_attempts,
        }
    }
}
