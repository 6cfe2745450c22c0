#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Map;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use common_geoip::{is_bogon, GeoIpError, Inet, BOGON};
use common_types::exception::{ExceptionUnit, Frame, Thread};
use common_types::{Attribute, Event, EventPayload, Exception};
use ingest::app::{create_router, AppState};
use ingest::attachments::{AttachmentError, AttachmentStore};
use ingest::bucket::BucketOptions;
use ingest::inet::ResolveInet;
use ingest::ledger::Ledger;
use ingest::pipeline::{IngestSettings, Pipeline};
use ingest::symbolicator::{ItemError, Symbolicate, SymbolicatorError};
use ingest::writer::{EventWriter, WriterError};

pub const BOUNDARY: &str = "msr-test-boundary";
pub const MAX_BATCH_SIZE_BYTES: usize = 64 * 1024;
pub const RETRY_AFTER_SECS: u64 = 60;

#[derive(Default)]
pub struct MockEventWriter {
    written: Mutex<Vec<Event>>,
}

impl MockEventWriter {
    pub fn written(&self) -> Vec<Event> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl EventWriter for MockEventWriter {
    async fn write(&self, events: &[Event]) -> Result<(), WriterError> {
        self.written.lock().extend_from_slice(events);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), WriterError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAttachmentStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MockAttachmentStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl AttachmentStore for MockAttachmentStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
        _original_file_name: &str,
    ) -> Result<String, AttachmentError> {
        self.objects.lock().insert(key.to_string(), data);
        Ok(format!("http://minio:9000/attachments/{key}"))
    }
}

/// Rewrites the first frame's class name, standing in for deobfuscation.
pub struct MockSymbolicator {
    pub class_name: String,
    calls: Mutex<usize>,
}

impl MockSymbolicator {
    pub fn new(class_name: &str) -> Arc<Self> {
        Arc::new(Self {
            class_name: class_name.to_string(),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Symbolicate for MockSymbolicator {
    async fn symbolicate(
        &self,
        _app_id: Uuid,
        events: &[Event],
    ) -> Result<Vec<(Uuid, Result<Event, ItemError>)>, SymbolicatorError> {
        *self.calls.lock() += 1;
        Ok(events
            .iter()
            .map(|event| {
                let mut event = event.clone();
                if let EventPayload::Exception(exception) = &mut event.payload {
                    for unit in &mut exception.exceptions {
                        for frame in &mut unit.frames {
                            frame.class_name = self.class_name.clone();
                        }
                    }
                }
                (event.id, Ok(event))
            })
            .collect())
    }
}

/// Every public address resolves to the same country.
pub struct FixedCountryResolver(pub &'static str);

impl ResolveInet for FixedCountryResolver {
    fn resolve(&self, raw_ip: &str) -> Result<Inet, GeoIpError> {
        let ip: IpAddr = raw_ip
            .parse()
            .map_err(|_| GeoIpError::InvalidIp(raw_ip.to_string()))?;
        let country_code = if is_bogon(&ip) { BOGON } else { self.0 };
        let mut inet = Inet {
            country_code: country_code.to_string(),
            ..Default::default()
        };
        match ip {
            IpAddr::V4(v4) => inet.ipv4 = Some(v4),
            IpAddr::V6(v6) => inet.ipv6 = Some(v6),
        }
        Ok(inet)
    }
}

pub struct TestHarness {
    pub db: PgPool,
    pub writer: Arc<MockEventWriter>,
    pub attachments: Arc<MockAttachmentStore>,
    app: Router,
}

impl TestHarness {
    pub fn new(db: PgPool) -> Self {
        Self::build(db, None, false)
    }

    pub fn with_symbolicator(db: PgPool, symbolicator: Arc<MockSymbolicator>) -> Self {
        Self::build(db, Some(symbolicator), false)
    }

    pub fn stopping_after_first_new_group(db: PgPool) -> Self {
        Self::build(db, None, true)
    }

    fn build(
        db: PgPool,
        symbolicator: Option<Arc<MockSymbolicator>>,
        stop_after_first_new_group: bool,
    ) -> Self {
        let writer = Arc::new(MockEventWriter::default());
        let attachments = Arc::new(MockAttachmentStore::default());

        let pipeline = Pipeline {
            ledger: Ledger::new(db.clone()),
            writer: writer.clone(),
            attachments: attachments.clone(),
            symbolicator: symbolicator.map(|s| -> Arc<dyn Symbolicate> { s }),
            inet: Arc::new(FixedCountryResolver("in")),
            settings: IngestSettings {
                max_batch_size_bytes: MAX_BATCH_SIZE_BYTES,
                retry_after_secs: RETRY_AFTER_SECS,
                symbolicator_batch_size: 2,
                bucket: BucketOptions {
                    stop_after_first_new_group,
                },
            },
        };

        let app = create_router(AppState {
            pg_pool: db.clone(),
            pipeline,
        });

        Self {
            db,
            writer,
            attachments,
            app,
        }
    }

    pub async fn put_events(
        &self,
        app_id: Uuid,
        request_id: Uuid,
        parts: &[Part],
    ) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/apps/{app_id}/events"))
                    .header("msr-req-id", request_id.to_string())
                    .header("x-forwarded-for", "13.106.122.3")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(multipart_body(parts)))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn body_json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

pub enum Part {
    Event(Event),
    Blob {
        id: Uuid,
        file_name: String,
        data: Vec<u8>,
    },
    Raw(String, Vec<u8>),
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Event(event) => {
                body.extend_from_slice(b"Content-Disposition: form-data; name=\"event\"\r\n\r\n");
                body.extend_from_slice(&serde_json::to_vec(event).unwrap());
            }
            Part::Blob {
                id,
                file_name,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"blob-{id}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Raw(name, data) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn insert_app(db: &PgPool) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO apps (id, app_name) VALUES ($1, $2)")
        .bind(id)
        .bind("sample")
        .execute(db)
        .await
        .unwrap();
    id
}

pub fn attribute() -> Attribute {
    Attribute {
        installation_id: Uuid::now_v7(),
        app_version: "1.2.0".to_string(),
        app_build: "120".to_string(),
        app_unique_id: "sh.measure.sample".to_string(),
        platform: "android".to_string(),
        measure_sdk_version: "0.9.0".to_string(),
        thread_name: "main".to_string(),
        device_manufacturer: "Google".to_string(),
        device_model: "Pixel 8".to_string(),
        os_name: "android".to_string(),
        os_version: "34".to_string(),
        ..Default::default()
    }
}

pub fn event(session_id: Uuid, payload: EventPayload) -> Event {
    Event {
        id: Uuid::now_v7(),
        app_id: Uuid::now_v7(),
        session_id,
        timestamp: Utc::now(),
        user_triggered: false,
        attribute: attribute(),
        user_defined_attribute: Map::new(),
        attachments: vec![],
        inet_ipv4: None,
        inet_ipv6: None,
        inet_country_code: String::new(),
        payload,
    }
}

pub fn crash(kind: &str, method: &str) -> EventPayload {
    EventPayload::Exception(Exception {
        handled: false,
        exceptions: vec![ExceptionUnit {
            kind: kind.to_string(),
            message: "boom".to_string(),
            frames: vec![Frame {
                class_name: "a.b".to_string(),
                method_name: method.to_string(),
                file_name: "MainActivity.kt".to_string(),
                line_num: 42,
                in_app: true,
                ..Default::default()
            }],
            ..Default::default()
        }],
        threads: vec![Thread {
            name: "main".to_string(),
            ..Default::default()
        }],
        foreground: true,
        ..Default::default()
    })
}
