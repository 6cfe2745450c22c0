use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::query::Query;
use clickhouse::{Client, Row};
use common_types::{
    AppFilter, IssueKind, LaunchKind, SCREEN_ACTIVITY_TYPES, SCREEN_FRAGMENT_TYPES,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ClickHouseConfig;
use crate::store::{
    EventStore, IssueEvent, JourneyEvent, JourneyStep, QueryError, SessionCounts, VersionScope,
};

/// Retried requests can write the same event twice. `FINAL` collapses
/// rows sharing the sorting key before unmerged parts reach a result.
const EVENTS_TABLE: &str = "events FINAL";

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Str(String),
    Strs(Vec<String>),
    Millis(i64),
}

/// `WHERE` clauses over the events table with their positional binds.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    clauses: Vec<String>,
    params: Vec<Param>,
}

impl Conditions {
    /// App, time range, attribute selectors and free text. Versions are
    /// scoped separately with [`Conditions::versions`].
    pub fn new(filter: &AppFilter) -> Self {
        let mut conditions = Conditions::default();
        conditions.push(
            "app_id = toUUID(?)",
            [Param::Str(filter.app_id.to_string())],
        );
        conditions.push(
            "timestamp >= fromUnixTimestamp64Milli(toInt64(?))",
            [Param::Millis(filter.from.timestamp_millis())],
        );
        conditions.push(
            "timestamp <= fromUnixTimestamp64Milli(toInt64(?))",
            [Param::Millis(filter.to.timestamp_millis())],
        );

        let selectors = [
            ("attribute_os_name", &filter.os_names),
            ("attribute_os_version", &filter.os_versions),
            ("inet_country_code", &filter.countries),
            ("attribute_device_name", &filter.device_names),
            ("attribute_device_manufacturer", &filter.device_manufacturers),
            ("attribute_device_locale", &filter.locales),
            ("attribute_network_provider", &filter.network_providers),
            ("attribute_network_type", &filter.network_types),
            ("attribute_network_generation", &filter.network_generations),
        ];
        for (column, values) in selectors {
            if !values.is_empty() {
                conditions.push(
                    format!("has(?, {column})"),
                    [Param::Strs(values.clone())],
                );
            }
        }

        if !filter.free_text.is_empty() {
            let text = filter.free_text.clone();
            conditions.push(
                "(positionCaseInsensitive(attribute_user_id, ?) > 0 \
                 OR positionCaseInsensitive(toString(session_id), ?) > 0 \
                 OR positionCaseInsensitive(coalesce(exception, anr, ''), ?) > 0)",
                [
                    Param::Str(text.clone()),
                    Param::Str(text.clone()),
                    Param::Str(text),
                ],
            );
        }

        conditions
    }

    pub fn versions(mut self, filter: &AppFilter, scope: VersionScope) -> Self {
        let pairs = filter.version_pairs();
        match scope {
            VersionScope::All => {}
            VersionScope::Selected if pairs.is_empty() => {}
            VersionScope::Unselected if pairs.is_empty() => self.push("1 = 0", []),
            VersionScope::Selected | VersionScope::Unselected => {
                let any_pair = vec!["(attribute_app_version = ? AND attribute_app_build = ?)"; pairs.len()]
                    .join(" OR ");
                let clause = if scope == VersionScope::Selected {
                    format!("({any_pair})")
                } else {
                    format!("NOT ({any_pair})")
                };
                let params = pairs
                    .into_iter()
                    .flat_map(|(version, code)| [Param::Str(version), Param::Str(code)]);
                self.push(clause, params);
            }
        }
        self
    }

    pub fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Param>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    pub fn sql(&self) -> String {
        self.clauses.join(" AND ")
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn bind(&self, mut query: Query) -> Query {
        for param in &self.params {
            query = match param {
                Param::Str(value) => query.bind(value.as_str()),
                Param::Strs(values) => query.bind(values.as_slice()),
                Param::Millis(value) => query.bind(*value),
            };
        }
        query
    }
}

fn fingerprint_column(kind: IssueKind) -> &'static str {
    match kind {
        IssueKind::Exception => "exception_fingerprint",
        IssueKind::Anr => "anr_fingerprint",
    }
}

/// Unhandled exceptions only; every ANR is an issue.
fn issue_predicate(kind: IssueKind) -> String {
    let column = fingerprint_column(kind);
    match kind {
        IssueKind::Exception => {
            format!("type = 'exception' AND exception_handled = false AND {column} = ?")
        }
        IssueKind::Anr => format!("type = 'anr' AND {column} = ?"),
    }
}

fn launch_column(kind: LaunchKind) -> &'static str {
    match kind {
        LaunchKind::Cold => "cold_launch_duration",
        LaunchKind::Warm => "warm_launch_duration",
        LaunchKind::Hot => "hot_launch_duration",
    }
}

fn launch_type(kind: LaunchKind) -> &'static str {
    match kind {
        LaunchKind::Cold => "cold_launch",
        LaunchKind::Warm => "warm_launch",
        LaunchKind::Hot => "hot_launch",
    }
}

fn quoted(values: &[&str]) -> String {
    values
        .iter()
        .map(|value| format!("'{value}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lifecycle events that bring a screen to the front plus unhandled issues.
fn journey_predicate() -> String {
    format!(
        "((type = 'lifecycle_activity' AND lifecycle_activity_type IN ({activity})) \
         OR (type = 'lifecycle_fragment' AND lifecycle_fragment_type IN ({fragment})) \
         OR type = 'anr' \
         OR (type = 'exception' AND exception_handled = false))",
        activity = quoted(&SCREEN_ACTIVITY_TYPES),
        fragment = quoted(&SCREEN_FRAGMENT_TYPES),
    )
}

fn issue_events_sql(filter: &AppFilter, kind: IssueKind, conditions: &Conditions) -> String {
    let order = filter.direction().order();
    format!(
        "SELECT id, session_id, timestamp, attribute, {payload} AS payload, attachments \
         FROM {EVENTS_TABLE} WHERE {conditions} \
         ORDER BY timestamp {order}, id {order} LIMIT {limit}",
        payload = kind.as_str(),
        conditions = conditions.sql(),
        limit = filter.extended_limit(),
    )
}

fn issue_event_ids_sql(kind: IssueKind) -> String {
    format!(
        "SELECT id FROM {EVENTS_TABLE} WHERE app_id = toUUID(?) AND {} ORDER BY timestamp, id",
        issue_predicate(kind)
    )
}

fn journey_sql(conditions: &Conditions) -> String {
    format!(
        "SELECT session_id, timestamp, toString(type) AS kind, \
         coalesce(lifecycle_activity_type, lifecycle_fragment_type, '') AS lifecycle_type, \
         coalesce(lifecycle_activity_class_name, lifecycle_fragment_class_name, '') AS class_name, \
         coalesce(exception_fingerprint, anr_fingerprint, '') AS fingerprint \
         FROM {EVENTS_TABLE} WHERE {} AND {} \
         ORDER BY timestamp, id",
        conditions.sql(),
        journey_predicate()
    )
}

fn launch_p95_sql(kind: LaunchKind, conditions: &Conditions) -> String {
    format!(
        "SELECT toFloat64(quantileExact(0.95)(assumeNotNull({column}))) AS p95, count() AS samples \
         FROM {EVENTS_TABLE} WHERE {conditions}",
        column = launch_column(kind),
        conditions = conditions.sql()
    )
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[derive(Row, Deserialize)]
struct IssueEventRow {
    #[serde(with = "clickhouse::serde::uuid")]
    id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    session_id: Uuid,
    timestamp: i64,
    attribute: String,
    payload: Option<String>,
    attachments: String,
}

impl IssueEventRow {
    fn into_event(self, kind: IssueKind) -> Result<IssueEvent, QueryError> {
        let id = self.id;
        let decode = |column: &'static str| {
            move |source: serde_json::Error| QueryError::Decode { id, column, source }
        };

        let payload = match self.payload {
            Some(raw) => serde_json::from_str(&raw).map_err(decode("payload"))?,
            None => serde_json::Value::Null,
        };

        Ok(IssueEvent {
            id,
            session_id: self.session_id,
            timestamp: from_millis(self.timestamp),
            kind,
            attribute: serde_json::from_str(&self.attribute).map_err(decode("attribute"))?,
            payload,
            attachments: serde_json::from_str(&self.attachments)
                .map_err(decode("attachments"))?,
        })
    }
}

#[derive(Row, Deserialize)]
struct IdRow {
    #[serde(with = "clickhouse::serde::uuid")]
    id: Uuid,
}

#[derive(Row, Deserialize)]
struct JourneyRow {
    #[serde(with = "clickhouse::serde::uuid")]
    session_id: Uuid,
    timestamp: i64,
    kind: String,
    lifecycle_type: String,
    class_name: String,
    fingerprint: String,
}

impl JourneyRow {
    fn into_step(self) -> Option<JourneyEvent> {
        let step = match self.kind.as_str() {
            "lifecycle_activity"
                if !self.class_name.is_empty()
                    && SCREEN_ACTIVITY_TYPES.contains(&self.lifecycle_type.as_str()) =>
            {
                JourneyStep::Screen(self.class_name)
            }
            "lifecycle_fragment"
                if !self.class_name.is_empty()
                    && SCREEN_FRAGMENT_TYPES.contains(&self.lifecycle_type.as_str()) =>
            {
                JourneyStep::Screen(self.class_name)
            }
            "exception" if !self.fingerprint.is_empty() => JourneyStep::Issue {
                kind: IssueKind::Exception,
                fingerprint: self.fingerprint,
            },
            "anr" if !self.fingerprint.is_empty() => JourneyStep::Issue {
                kind: IssueKind::Anr,
                fingerprint: self.fingerprint,
            },
            _ => return None,
        };

        Some(JourneyEvent {
            session_id: self.session_id,
            timestamp: from_millis(self.timestamp),
            step,
        })
    }
}

#[derive(Row, Deserialize)]
struct SessionCountsRow {
    sessions: u64,
    crash_sessions: u64,
    perceived_crash_sessions: u64,
    anr_sessions: u64,
    perceived_anr_sessions: u64,
}

#[derive(Row, Deserialize)]
struct PercentileRow {
    p95: f64,
    samples: u64,
}

#[derive(Clone)]
pub struct ClickHouseEventStore {
    client: Client,
}

impl ClickHouseEventStore {
    pub async fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        let client = Client::default()
            .with_url(config.url.clone())
            .with_database(config.database.clone())
            .with_user(config.user.clone())
            .with_password(config.password.clone());

        client
            .query("SELECT 1")
            .execute()
            .await
            .context("Failed to connect to ClickHouse")?;

        info!("Successfully connected to ClickHouse at {}", config.url);

        Ok(Self { client })
    }
}

#[async_trait]
impl EventStore for ClickHouseEventStore {
    async fn issue_events(
        &self,
        filter: &AppFilter,
        kind: IssueKind,
        fingerprint: &str,
    ) -> Result<Vec<IssueEvent>, QueryError> {
        let mut conditions = Conditions::new(filter).versions(filter, VersionScope::Selected);
        conditions.push(issue_predicate(kind), [Param::Str(fingerprint.to_string())]);

        if let Some(keyset) = filter.keyset {
            conditions.push(
                format!(
                    "(timestamp, id) {} (fromUnixTimestamp64Milli(toInt64(?)), toUUID(?))",
                    filter.direction().operator()
                ),
                [
                    Param::Millis(keyset.timestamp.timestamp_millis()),
                    Param::Str(keyset.id.to_string()),
                ],
            );
        }

        let sql = issue_events_sql(filter, kind, &conditions);
        let rows = conditions
            .bind(self.client.query(&sql))
            .fetch_all::<IssueEventRow>()
            .await?;

        rows.into_iter().map(|row| row.into_event(kind)).collect()
    }

    async fn issue_event_ids(
        &self,
        app_id: Uuid,
        kind: IssueKind,
        fingerprint: &str,
    ) -> Result<Vec<Uuid>, QueryError> {
        let rows = self
            .client
            .query(&issue_event_ids_sql(kind))
            .bind(app_id.to_string())
            .bind(fingerprint)
            .fetch_all::<IdRow>()
            .await?;

        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn journey_events(&self, filter: &AppFilter) -> Result<Vec<JourneyEvent>, QueryError> {
        let conditions = Conditions::new(filter).versions(filter, VersionScope::Selected);
        let rows = conditions
            .bind(self.client.query(&journey_sql(&conditions)))
            .fetch_all::<JourneyRow>()
            .await?;

        Ok(rows.into_iter().filter_map(JourneyRow::into_step).collect())
    }

    async fn session_counts(
        &self,
        filter: &AppFilter,
        scope: VersionScope,
    ) -> Result<SessionCounts, QueryError> {
        let conditions = Conditions::new(filter).versions(filter, scope);
        let crash = "type = 'exception' AND coalesce(exception_handled, true) = false";
        let sql = format!(
            "SELECT uniqExact(session_id) AS sessions, \
             uniqExactIf(session_id, {crash}) AS crash_sessions, \
             uniqExactIf(session_id, {crash} AND coalesce(exception_foreground, false)) AS perceived_crash_sessions, \
             uniqExactIf(session_id, type = 'anr') AS anr_sessions, \
             uniqExactIf(session_id, type = 'anr' AND coalesce(anr_foreground, false)) AS perceived_anr_sessions \
             FROM {EVENTS_TABLE} WHERE {}",
            conditions.sql()
        );

        let row = conditions
            .bind(self.client.query(&sql))
            .fetch_one::<SessionCountsRow>()
            .await?;

        Ok(SessionCounts {
            sessions: row.sessions,
            crash_sessions: row.crash_sessions,
            perceived_crash_sessions: row.perceived_crash_sessions,
            anr_sessions: row.anr_sessions,
            perceived_anr_sessions: row.perceived_anr_sessions,
        })
    }

    async fn launch_p95(
        &self,
        filter: &AppFilter,
        kind: LaunchKind,
        scope: VersionScope,
    ) -> Result<Option<f64>, QueryError> {
        let mut conditions = Conditions::new(filter).versions(filter, scope);
        conditions.push(format!("type = '{}'", launch_type(kind)), []);
        conditions.push(kind.sql_bounds(launch_column(kind)), []);

        let row = conditions
            .bind(self.client.query(&launch_p95_sql(kind, &conditions)))
            .fetch_one::<PercentileRow>()
            .await?;

        if row.samples == 0 {
            return Ok(None);
        }
        if row.p95.is_nan() {
            warn!(launch = launch_type(kind), "launch percentile came back NaN");
            return Ok(None);
        }
        Ok(Some(row.p95))
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        self.client.query("SELECT 1").execute().await?;
        Ok(())
    }
}
