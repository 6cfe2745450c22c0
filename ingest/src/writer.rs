use anyhow::Context;
use async_trait::async_trait;
use clickhouse::{Client, Row};
use common_types::{Event, EventPayload};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ClickHouseConfig;

const EVENTS_TABLE: &str = "events";
const EVENT_WRITER_ROWS: &str = "ingest_event_writer_rows_total";

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("failed to encode event {id}: {source}")]
    Encode {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },
    #[error("clickhouse unavailable: {0}")]
    Unavailable(#[from] clickhouse::error::Error),
}

/// Sink for ingested events. Implementations accept rows for writing and
/// return without waiting for durability.
#[async_trait]
pub trait EventWriter: Send + Sync {
    async fn write(&self, events: &[Event]) -> Result<(), WriterError>;

    async fn health_check(&self) -> Result<(), WriterError>;
}

/// One row per event. Columns of payload types other than the event's own
/// stay null.
#[derive(Row, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    #[serde(with = "clickhouse::serde::uuid")]
    pub id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub app_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub session_id: Uuid,
    /// DateTime64(3), milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_triggered: bool,

    #[serde(with = "clickhouse::serde::uuid")]
    pub attribute_installation_id: Uuid,
    pub attribute_app_version: String,
    pub attribute_app_build: String,
    pub attribute_app_unique_id: String,
    pub attribute_platform: String,
    pub attribute_measure_sdk_version: String,
    pub attribute_thread_name: String,
    pub attribute_user_id: String,
    pub attribute_device_name: String,
    pub attribute_device_model: String,
    pub attribute_device_manufacturer: String,
    pub attribute_device_type: String,
    pub attribute_device_locale: String,
    pub attribute_os_name: String,
    pub attribute_os_version: String,
    pub attribute_network_type: String,
    pub attribute_network_provider: String,
    pub attribute_network_generation: String,
    pub attribute: String,
    pub user_defined_attribute: String,
    pub attachments: String,

    pub inet_ipv4: Option<String>,
    pub inet_ipv6: Option<String>,
    pub inet_country_code: String,

    pub exception_handled: Option<bool>,
    pub exception_fingerprint: Option<String>,
    pub exception_foreground: Option<bool>,
    pub anr_fingerprint: Option<String>,
    pub anr_foreground: Option<bool>,
    pub lifecycle_activity_type: Option<String>,
    pub lifecycle_activity_class_name: Option<String>,
    pub lifecycle_fragment_type: Option<String>,
    pub lifecycle_fragment_class_name: Option<String>,
    pub cold_launch_duration: Option<i64>,
    pub warm_launch_duration: Option<i64>,
    pub hot_launch_duration: Option<i64>,

    pub anr: Option<String>,
    pub exception: Option<String>,
    pub app_exit: Option<String>,
    pub string: Option<String>,
    pub gesture_click: Option<String>,
    pub gesture_long_click: Option<String>,
    pub gesture_scroll: Option<String>,
    pub lifecycle_activity: Option<String>,
    pub lifecycle_fragment: Option<String>,
    pub lifecycle_view_controller: Option<String>,
    pub lifecycle_swift_ui: Option<String>,
    pub lifecycle_app: Option<String>,
    pub cold_launch: Option<String>,
    pub warm_launch: Option<String>,
    pub hot_launch: Option<String>,
    pub network_change: Option<String>,
    pub http: Option<String>,
    pub memory_usage: Option<String>,
    pub memory_usage_absolute: Option<String>,
    pub low_memory: Option<String>,
    pub trim_memory: Option<String>,
    pub cpu_usage: Option<String>,
    pub navigation: Option<String>,
    pub screen_view: Option<String>,
    pub custom: Option<String>,
    pub bug_report: Option<String>,
    pub session_start: Option<String>,
}

fn encode<T: Serialize>(id: Uuid, value: &T) -> Result<String, WriterError> {
    serde_json::to_string(value).map_err(|source| WriterError::Encode { id, source })
}

impl EventRow {
    pub fn from_event(event: &Event) -> Result<Self, WriterError> {
        let id = event.id;
        let attribute = &event.attribute;

        let mut row = EventRow {
            id,
            app_id: event.app_id,
            session_id: event.session_id,
            timestamp: event.timestamp.timestamp_millis(),
            kind: event.kind().to_string(),
            user_triggered: event.user_triggered,
            attribute_installation_id: attribute.installation_id,
            attribute_app_version: attribute.app_version.clone(),
            attribute_app_build: attribute.app_build.clone(),
            attribute_app_unique_id: attribute.app_unique_id.clone(),
            attribute_platform: attribute.platform.clone(),
            attribute_measure_sdk_version: attribute.measure_sdk_version.clone(),
            attribute_thread_name: attribute.thread_name.clone(),
            attribute_user_id: attribute.user_id.clone(),
            attribute_device_name: attribute.device_name.clone(),
            attribute_device_model: attribute.device_model.clone(),
            attribute_device_manufacturer: attribute.device_manufacturer.clone(),
            attribute_device_type: attribute.device_type.clone(),
            attribute_device_locale: attribute.device_locale.clone(),
            attribute_os_name: attribute.os_name.clone(),
            attribute_os_version: attribute.os_version.clone(),
            attribute_network_type: attribute.network_type.clone(),
            attribute_network_provider: attribute.network_provider.clone(),
            attribute_network_generation: attribute.network_generation.clone(),
            attribute: encode(id, attribute)?,
            user_defined_attribute: encode(id, &event.user_defined_attribute)?,
            attachments: encode(id, &event.attachments)?,
            inet_ipv4: event.inet_ipv4.map(|ip| ip.to_string()),
            inet_ipv6: event.inet_ipv6.map(|ip| ip.to_string()),
            inet_country_code: event.inet_country_code.clone(),
            ..Default::default()
        };

        match &event.payload {
            EventPayload::Anr(anr) => {
                row.anr_fingerprint = Some(anr.fingerprint.clone());
                row.anr_foreground = Some(anr.foreground);
                row.anr = Some(encode(id, anr)?);
            }
            EventPayload::Exception(exception) => {
                row.exception_handled = Some(exception.handled);
                row.exception_fingerprint = Some(exception.fingerprint.clone());
                row.exception_foreground = Some(exception.foreground);
                row.exception = Some(encode(id, exception)?);
            }
            EventPayload::AppExit(v) => row.app_exit = Some(encode(id, v)?),
            EventPayload::String(v) => row.string = Some(encode(id, v)?),
            EventPayload::GestureClick(v) => row.gesture_click = Some(encode(id, v)?),
            EventPayload::GestureLongClick(v) => row.gesture_long_click = Some(encode(id, v)?),
            EventPayload::GestureScroll(v) => row.gesture_scroll = Some(encode(id, v)?),
            EventPayload::LifecycleActivity(v) => {
                row.lifecycle_activity_type = Some(v.kind.clone());
                row.lifecycle_activity_class_name = Some(v.class_name.clone());
                row.lifecycle_activity = Some(encode(id, v)?);
            }
            EventPayload::LifecycleFragment(v) => {
                row.lifecycle_fragment_type = Some(v.kind.clone());
                row.lifecycle_fragment_class_name = Some(v.class_name.clone());
                row.lifecycle_fragment = Some(encode(id, v)?);
            }
            EventPayload::LifecycleViewController(v) => {
                row.lifecycle_view_controller = Some(encode(id, v)?)
            }
            EventPayload::LifecycleSwiftUi(v) => row.lifecycle_swift_ui = Some(encode(id, v)?),
            EventPayload::LifecycleApp(v) => row.lifecycle_app = Some(encode(id, v)?),
            EventPayload::ColdLaunch(v) => {
                row.cold_launch_duration = Some(v.duration);
                row.cold_launch = Some(encode(id, v)?);
            }
            EventPayload::WarmLaunch(v) => {
                row.warm_launch_duration = Some(v.duration);
                row.warm_launch = Some(encode(id, v)?);
            }
            EventPayload::HotLaunch(v) => {
                row.hot_launch_duration = Some(v.duration);
                row.hot_launch = Some(encode(id, v)?);
            }
            EventPayload::NetworkChange(v) => row.network_change = Some(encode(id, v)?),
            EventPayload::Http(v) => row.http = Some(encode(id, v)?),
            EventPayload::MemoryUsage(v) => row.memory_usage = Some(encode(id, v)?),
            EventPayload::MemoryUsageAbsolute(v) => {
                row.memory_usage_absolute = Some(encode(id, v)?)
            }
            EventPayload::LowMemory(v) => row.low_memory = Some(encode(id, v)?),
            EventPayload::TrimMemory(v) => row.trim_memory = Some(encode(id, v)?),
            EventPayload::CpuUsage(v) => row.cpu_usage = Some(encode(id, v)?),
            EventPayload::Navigation(v) => row.navigation = Some(encode(id, v)?),
            EventPayload::ScreenView(v) => row.screen_view = Some(encode(id, v)?),
            EventPayload::Custom(v) => row.custom = Some(encode(id, v)?),
            EventPayload::BugReport(v) => row.bug_report = Some(encode(id, v)?),
            EventPayload::SessionStart(v) => row.session_start = Some(encode(id, v)?),
        }

        Ok(row)
    }
}

pub fn clickhouse_client(config: &ClickHouseConfig) -> Client {
    Client::default()
        .with_url(config.url.clone())
        .with_database(config.database.clone())
        .with_user(config.user.clone())
        .with_password(config.password.clone())
        .with_option("async_insert", "1")
        .with_option("wait_for_async_insert", "0")
}

/// Writes through ClickHouse async inserts. The insert runs detached from
/// the request; failures are logged and counted, never surfaced.
#[derive(Clone)]
pub struct ClickHouseEventWriter {
    client: Client,
}

impl ClickHouseEventWriter {
    pub async fn new(config: &ClickHouseConfig) -> anyhow::Result<Self> {
        let client = clickhouse_client(config);

        client
            .query("SELECT 1")
            .execute()
            .await
            .context("Failed to connect to ClickHouse")?;

        info!("Successfully connected to ClickHouse at {}", config.url);

        Ok(Self { client })
    }
}

async fn insert_rows(client: &Client, rows: &[EventRow]) -> clickhouse::error::Result<()> {
    let mut insert = client.insert(EVENTS_TABLE)?;
    for row in rows {
        insert.write(row).await?;
    }
    insert.end().await
}

#[async_trait]
impl EventWriter for ClickHouseEventWriter {
    async fn write(&self, events: &[Event]) -> Result<(), WriterError> {
        let rows = events
            .iter()
            .map(EventRow::from_event)
            .collect::<Result<Vec<_>, _>>()?;

        let client = self.client.clone();
        tokio::spawn(async move {
            let count = rows.len() as u64;
            match insert_rows(&client, &rows).await {
                Ok(()) => counter!(EVENT_WRITER_ROWS, "outcome" => "accepted").increment(count),
                Err(e) => {
                    counter!(EVENT_WRITER_ROWS, "outcome" => "failed").increment(count);
                    error!(rows = count, error = %e, "failed to write events");
                }
            }
        });

        Ok(())
    }

    async fn health_check(&self) -> Result<(), WriterError> {
        self.client.query("SELECT 1").execute().await?;
        Ok(())
    }
}
