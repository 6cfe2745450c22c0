#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Map;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use common_types::event::LifecycleActivity;
use common_types::launch::{p95, ColdLaunch};
use common_types::{
    Anr, AppFilter, Attachment, Attribute, Direction, Event, EventPayload, Exception, IssueKind,
    LaunchKind,
};
use query_api::app::{create_router, AppState};
use query_api::presign::{PresignError, UrlSigner};
use query_api::store::{
    EventStore, IssueEvent, JourneyEvent, JourneyStep, QueryError, SessionCounts, VersionScope,
};

/// Events kept in memory, filtered the way the columnar store filters them.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    /// Stores events the way reads see them after duplicates collapse:
    /// a second write of the same id replaces the first.
    pub fn push(&self, events: impl IntoIterator<Item = Event>) {
        let mut stored = self.events.lock();
        for event in events {
            match stored.iter_mut().find(|e| e.id == event.id) {
                Some(existing) => *existing = event,
                None => stored.push(event),
            }
        }
    }

    fn matching(&self, filter: &AppFilter, scope: VersionScope) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|event| matches(filter, event, scope))
            .cloned()
            .collect()
    }
}

fn selected(values: &[String], value: &str) -> bool {
    values.is_empty() || values.iter().any(|v| v == value)
}

fn in_scope(filter: &AppFilter, event: &Event, scope: VersionScope) -> bool {
    let pairs = filter.version_pairs();
    let is_selected = pairs.iter().any(|(version, code)| {
        *version == event.attribute.app_version && *code == event.attribute.app_build
    });
    match scope {
        VersionScope::All => true,
        VersionScope::Selected => pairs.is_empty() || is_selected,
        VersionScope::Unselected => !pairs.is_empty() && !is_selected,
    }
}

fn matches(filter: &AppFilter, event: &Event, scope: VersionScope) -> bool {
    let attribute = &event.attribute;
    event.app_id == filter.app_id
        && event.timestamp >= filter.from
        && event.timestamp <= filter.to
        && selected(&filter.os_names, &attribute.os_name)
        && selected(&filter.os_versions, &attribute.os_version)
        && selected(&filter.countries, &event.inet_country_code)
        && selected(&filter.device_names, &attribute.device_name)
        && selected(&filter.device_manufacturers, &attribute.device_manufacturer)
        && selected(&filter.locales, &attribute.device_locale)
        && selected(&filter.network_providers, &attribute.network_provider)
        && selected(&filter.network_types, &attribute.network_type)
        && selected(&filter.network_generations, &attribute.network_generation)
        && in_scope(filter, event, scope)
}

fn issue_fingerprint(event: &Event, kind: IssueKind) -> Option<&str> {
    match kind {
        IssueKind::Exception => event
            .exception()
            .filter(|e| !e.handled)
            .map(|e| e.fingerprint.as_str()),
        IssueKind::Anr => event.anr().map(|a| a.fingerprint.as_str()),
    }
}

fn sessions_where(events: &[Event], predicate: impl Fn(&Event) -> bool) -> u64 {
    events
        .iter()
        .filter(|event| predicate(event))
        .map(|event| event.session_id)
        .collect::<HashSet<_>>()
        .len() as u64
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn issue_events(
        &self,
        filter: &AppFilter,
        kind: IssueKind,
        fingerprint: &str,
    ) -> Result<Vec<IssueEvent>, QueryError> {
        let direction = filter.direction();
        let mut events: Vec<Event> = self
            .matching(filter, VersionScope::Selected)
            .into_iter()
            .filter(|event| issue_fingerprint(event, kind) == Some(fingerprint))
            .filter(|event| match (filter.keyset, direction) {
                (None, _) => true,
                (Some(k), Direction::Forward) => (event.timestamp, event.id) > (k.timestamp, k.id),
                (Some(k), Direction::Backward) => (event.timestamp, event.id) < (k.timestamp, k.id),
            })
            .collect();

        events.sort_by_key(|event| (event.timestamp, event.id));
        if direction == Direction::Backward {
            events.reverse();
        }
        events.truncate(filter.extended_limit());

        Ok(events
            .into_iter()
            .map(|event| {
                let payload = match &event.payload {
                    EventPayload::Exception(e) => serde_json::to_value(e).unwrap(),
                    EventPayload::Anr(a) => serde_json::to_value(a).unwrap(),
                    _ => serde_json::Value::Null,
                };
                IssueEvent {
                    id: event.id,
                    session_id: event.session_id,
                    timestamp: event.timestamp,
                    kind,
                    attribute: event.attribute,
                    payload,
                    attachments: event.attachments,
                }
            })
            .collect())
    }

    async fn issue_event_ids(
        &self,
        app_id: Uuid,
        kind: IssueKind,
        fingerprint: &str,
    ) -> Result<Vec<Uuid>, QueryError> {
        let mut events: Vec<Event> = self
            .events
            .lock()
            .iter()
            .filter(|event| event.app_id == app_id)
            .filter(|event| issue_fingerprint(event, kind) == Some(fingerprint))
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.timestamp, event.id));
        Ok(events.into_iter().map(|event| event.id).collect())
    }

    async fn journey_events(&self, filter: &AppFilter) -> Result<Vec<JourneyEvent>, QueryError> {
        let mut events = self.matching(filter, VersionScope::Selected);
        events.sort_by_key(|event| (event.timestamp, event.id));

        Ok(events
            .iter()
            .filter_map(|event| {
                let step = if let Some(name) = event.screen_name() {
                    JourneyStep::Screen(name.to_string())
                } else if let Some(fingerprint) = issue_fingerprint(event, IssueKind::Exception) {
                    JourneyStep::Issue {
                        kind: IssueKind::Exception,
                        fingerprint: fingerprint.to_string(),
                    }
                } else if let Some(fingerprint) = issue_fingerprint(event, IssueKind::Anr) {
                    JourneyStep::Issue {
                        kind: IssueKind::Anr,
                        fingerprint: fingerprint.to_string(),
                    }
                } else {
                    return None;
                };
                Some(JourneyEvent {
                    session_id: event.session_id,
                    timestamp: event.timestamp,
                    step,
                })
            })
            .collect())
    }

    async fn session_counts(
        &self,
        filter: &AppFilter,
        scope: VersionScope,
    ) -> Result<SessionCounts, QueryError> {
        let events = self.matching(filter, scope);
        let crash = |e: &Event| e.is_unhandled_exception();
        Ok(SessionCounts {
            sessions: sessions_where(&events, |_| true),
            crash_sessions: sessions_where(&events, crash),
            perceived_crash_sessions: sessions_where(&events, |e| {
                crash(e) && e.exception().is_some_and(|x| x.foreground)
            }),
            anr_sessions: sessions_where(&events, |e| e.is_anr()),
            perceived_anr_sessions: sessions_where(&events, |e| {
                e.anr().is_some_and(|a| a.foreground)
            }),
        })
    }

    async fn launch_p95(
        &self,
        filter: &AppFilter,
        kind: LaunchKind,
        scope: VersionScope,
    ) -> Result<Option<f64>, QueryError> {
        let durations: Vec<i64> = self
            .matching(filter, scope)
            .iter()
            .filter_map(|event| match (&event.payload, kind) {
                (EventPayload::ColdLaunch(l), LaunchKind::Cold) => Some(l.duration),
                (EventPayload::WarmLaunch(l), LaunchKind::Warm) => Some(l.duration),
                (EventPayload::HotLaunch(l), LaunchKind::Hot) => Some(l.duration),
                _ => None,
            })
            .collect();
        Ok(p95(kind, &durations))
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        Ok(())
    }
}

/// Signs every key under a fixed host.
pub struct StaticSigner;

#[async_trait]
impl UrlSigner for StaticSigner {
    async fn presign(&self, key: &str) -> Result<String, PresignError> {
        Ok(format!("https://signed.test/{key}?X-Amz-Expires=172800"))
    }
}

pub struct TestHarness {
    pub db: PgPool,
    pub events: Arc<MemoryEventStore>,
    app: Router,
}

impl TestHarness {
    pub fn new(db: PgPool) -> Self {
        let events = Arc::new(MemoryEventStore::default());
        let app = create_router(AppState {
            pg_pool: db.clone(),
            events: events.clone(),
            signer: Arc::new(StaticSigner),
        });
        Self { db, events, app }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn body_json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

pub async fn insert_app(db: &PgPool, os_name: &str, onboarded: bool) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO apps (id, app_name, os_name, onboarded) VALUES ($1, 'sample', $2, $3)")
        .bind(id)
        .bind(os_name)
        .bind(onboarded)
        .execute(db)
        .await
        .unwrap();
    id
}

pub async fn insert_group(
    db: &PgPool,
    kind: IssueKind,
    app_id: Uuid,
    fingerprint: &str,
    kind_name: &str,
    file_name: &str,
) -> Uuid {
    let id = Uuid::now_v7();
    let now = Utc::now();
    sqlx::query(&format!(
        "INSERT INTO {} (id, app_id, fingerprint, type, file_name, first_seen, last_seen) \
         VALUES ($1, $2, $3, $4, $5, $6, $6)",
        kind.table()
    ))
    .bind(id)
    .bind(app_id)
    .bind(fingerprint)
    .bind(kind_name)
    .bind(file_name)
    .bind(now)
    .execute(db)
    .await
    .unwrap();
    id
}

pub async fn insert_build_size(db: &PgPool, app_id: Uuid, name: &str, code: &str, size: i64) {
    sqlx::query(
        "INSERT INTO build_sizes (app_id, version_name, version_code, build_size) VALUES ($1, $2, $3, $4)",
    )
    .bind(app_id)
    .bind(name)
    .bind(code)
    .bind(size)
    .execute(db)
    .await
    .unwrap();
}

/// Whole seconds, a day back, so timestamps survive a round trip through
/// query strings and land inside the default range.
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp() - 86_400, 0).unwrap()
}

pub fn attribute(version: &str, build: &str) -> Attribute {
    Attribute {
        installation_id: Uuid::now_v7(),
        app_version: version.to_string(),
        app_build: build.to_string(),
        app_unique_id: "sh.measure.sample".to_string(),
        measure_sdk_version: "0.9.0".to_string(),
        os_name: "android".to_string(),
        os_version: "34".to_string(),
        ..Default::default()
    }
}

pub fn event(
    app_id: Uuid,
    session_id: Uuid,
    timestamp: DateTime<Utc>,
    version: (&str, &str),
    payload: EventPayload,
) -> Event {
    Event {
        id: Uuid::now_v7(),
        app_id,
        session_id,
        timestamp,
        user_triggered: false,
        attribute: attribute(version.0, version.1),
        user_defined_attribute: Map::new(),
        attachments: vec![],
        inet_ipv4: None,
        inet_ipv6: None,
        inet_country_code: "in".to_string(),
        payload,
    }
}

pub fn crash(fingerprint: &str, foreground: bool) -> EventPayload {
    EventPayload::Exception(Exception {
        handled: false,
        fingerprint: fingerprint.to_string(),
        foreground,
        ..Default::default()
    })
}

pub fn handled(fingerprint: &str) -> EventPayload {
    EventPayload::Exception(Exception {
        handled: true,
        fingerprint: fingerprint.to_string(),
        ..Default::default()
    })
}

pub fn anr(fingerprint: &str, foreground: bool) -> EventPayload {
    EventPayload::Anr(Anr {
        fingerprint: fingerprint.to_string(),
        foreground,
        ..Default::default()
    })
}

pub fn activity(class_name: &str) -> EventPayload {
    activity_lifecycle(class_name, "created")
}

pub fn activity_lifecycle(class_name: &str, kind: &str) -> EventPayload {
    EventPayload::LifecycleActivity(LifecycleActivity {
        kind: kind.to_string(),
        class_name: class_name.to_string(),
        ..Default::default()
    })
}

pub fn cold_launch(duration: i64) -> EventPayload {
    EventPayload::ColdLaunch(ColdLaunch {
        launched_activity: "MainActivity".to_string(),
        duration,
        ..Default::default()
    })
}

pub fn screenshot(key: &str) -> Attachment {
    Attachment {
        id: Uuid::now_v7(),
        name: "screenshot.png".to_string(),
        kind: "screenshot".to_string(),
        key: key.to_string(),
        location: format!("http://minio:9000/attachments/{key}"),
    }
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}
