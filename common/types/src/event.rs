use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::attachment::Attachment;
use crate::attribute::Attribute;
use crate::exception::{Anr, Exception, IssueSignature};
use crate::launch::{ColdLaunch, HotLaunch, LaunchAnomaly, WarmLaunch};
use crate::os::OsFamily;
use crate::validation::{check_max_chars, check_present, ValidationError};

const MAX_TYPE_CHARS: usize = 32;
const MAX_APP_EXIT_REASON_CHARS: usize = 64;
const MAX_APP_EXIT_IMPORTANCE_CHARS: usize = 32;
const MAX_SEVERITY_TEXT_CHARS: usize = 10;
const MAX_GESTURE_TARGET_CHARS: usize = 128;
const MAX_GESTURE_TARGET_ID_CHARS: usize = 128;
const MAX_GESTURE_SCROLL_DIRECTION_CHARS: usize = 8;
const MAX_LIFECYCLE_TYPE_CHARS: usize = 32;
const MAX_LIFECYCLE_CLASS_NAME_CHARS: usize = 128;
const MAX_VIEW_CONTROLLER_CLASS_NAME_CHARS: usize = 256;
const MAX_LAUNCHED_ACTIVITY_CHARS: usize = 128;
const MAX_NETWORK_TYPE_CHARS: usize = 16;
const MAX_NETWORK_GENERATION_CHARS: usize = 8;
const MAX_NETWORK_PROVIDER_CHARS: usize = 64;
const MAX_HTTP_METHOD_CHARS: usize = 16;
const MAX_HTTP_CLIENT_CHARS: usize = 32;
const MAX_TRIM_MEMORY_LEVEL_CHARS: usize = 64;
const MAX_NAVIGATION_CHARS: usize = 128;
const MAX_SCREEN_VIEW_NAME_CHARS: usize = 128;
const MAX_CUSTOM_NAME_CHARS: usize = 64;
const MAX_BUG_REPORT_DESCRIPTION_CHARS: usize = 4000;

const CUSTOM_NAME_PATTERN: &str = "^[a-zA-Z0-9_-]+$";

/// Activity lifecycle types that put a screen in front of the user.
pub const SCREEN_ACTIVITY_TYPES: [&str; 2] = ["created", "resumed"];
/// Fragment lifecycle types that put a screen in front of the user.
pub const SCREEN_FRAGMENT_TYPES: [&str; 2] = ["attached", "resumed"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppExit {
    pub reason: String,
    pub importance: String,
    pub trace: String,
    pub process_name: String,
    pub pid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogString {
    pub severity_text: String,
    pub string: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureClick {
    pub target: String,
    pub target_id: String,
    pub touch_down_time: u64,
    pub touch_up_time: u64,
    pub width: u16,
    pub height: u16,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureScroll {
    pub target: String,
    pub target_id: String,
    pub touch_down_time: u64,
    pub touch_up_time: u64,
    pub x: f32,
    pub y: f32,
    pub end_x: f32,
    pub end_y: f32,
    pub direction: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleActivity {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_name: String,
    pub intent: String,
    pub saved_instance_state: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleFragment {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_name: String,
    pub parent_activity: String,
    pub parent_fragment: String,
    pub tag: String,
}

/// Shared shape of `lifecycle_view_controller` and `lifecycle_swift_ui`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleView {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleApp {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkChange {
    pub network_type: String,
    pub previous_network_type: String,
    pub network_generation: String,
    pub previous_network_generation: String,
    pub network_provider: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    pub url: String,
    pub method: String,
    pub status_code: u16,
    pub start_time: u64,
    pub end_time: u64,
    pub request_body: String,
    pub response_body: String,
    pub failure_reason: String,
    pub failure_description: String,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub client: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsage {
    pub java_max_heap: u64,
    pub java_total_heap: u64,
    pub java_free_heap: u64,
    pub total_pss: u64,
    pub rss: u64,
    pub native_total_heap: u64,
    pub native_free_heap: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsageAbsolute {
    pub max_memory: u64,
    pub used_memory: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowMemory {
    pub java_max_heap: u64,
    pub java_total_heap: u64,
    pub java_free_heap: u64,
    pub total_pss: u64,
    pub rss: u64,
    pub native_total_heap: u64,
    pub native_free_heap: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimMemory {
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuUsage {
    pub num_cores: u8,
    pub clock_speed: u64,
    pub start_time: u64,
    pub uptime: u64,
    pub utime: u64,
    pub cutime: u64,
    pub stime: u64,
    pub cstime: u64,
    pub interval: u64,
    pub percentage_usage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Navigation {
    pub from: String,
    pub to: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenView {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Custom {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugReport {
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStart {}

/// The type-specific part of an event. Exactly one variant is present per
/// event and its tag is the event's `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    Anr(Anr),
    Exception(Exception),
    AppExit(AppExit),
    String(LogString),
    GestureClick(GestureClick),
    GestureLongClick(GestureClick),
    GestureScroll(GestureScroll),
    LifecycleActivity(LifecycleActivity),
    LifecycleFragment(LifecycleFragment),
    LifecycleViewController(LifecycleView),
    #[serde(rename = "lifecycle_swift_ui")]
    LifecycleSwiftUi(LifecycleView),
    LifecycleApp(LifecycleApp),
    ColdLaunch(ColdLaunch),
    WarmLaunch(WarmLaunch),
    HotLaunch(HotLaunch),
    NetworkChange(NetworkChange),
    Http(Http),
    MemoryUsage(MemoryUsage),
    MemoryUsageAbsolute(MemoryUsageAbsolute),
    LowMemory(LowMemory),
    TrimMemory(TrimMemory),
    CpuUsage(CpuUsage),
    Navigation(Navigation),
    ScreenView(ScreenView),
    Custom(Custom),
    BugReport(BugReport),
    SessionStart(SessionStart),
}

pub const TYPE_ANR: &str = "anr";
pub const TYPE_EXCEPTION: &str = "exception";
pub const TYPE_LIFECYCLE_ACTIVITY: &str = "lifecycle_activity";
pub const TYPE_LIFECYCLE_FRAGMENT: &str = "lifecycle_fragment";

pub const EVENT_TYPES: [&str; 27] = [
    "anr",
    "exception",
    "app_exit",
    "string",
    "gesture_click",
    "gesture_long_click",
    "gesture_scroll",
    "lifecycle_activity",
    "lifecycle_fragment",
    "lifecycle_view_controller",
    "lifecycle_swift_ui",
    "lifecycle_app",
    "cold_launch",
    "warm_launch",
    "hot_launch",
    "network_change",
    "http",
    "memory_usage",
    "memory_usage_absolute",
    "low_memory",
    "trim_memory",
    "cpu_usage",
    "navigation",
    "screen_view",
    "custom",
    "bug_report",
    "session_start",
];

const APPLE_EXCLUDED_TYPES: [&str; 8] = [
    "anr",
    "app_exit",
    "lifecycle_activity",
    "lifecycle_fragment",
    "memory_usage",
    "low_memory",
    "trim_memory",
    "navigation",
];

const ANDROID_EXCLUDED_TYPES: [&str; 2] = ["lifecycle_view_controller", "lifecycle_swift_ui"];

impl EventPayload {
    pub fn tag(&self) -> &'static str {
        match self {
            EventPayload::Anr(_) => "anr",
            EventPayload::Exception(_) => "exception",
            EventPayload::AppExit(_) => "app_exit",
            EventPayload::String(_) => "string",
            EventPayload::GestureClick(_) => "gesture_click",
            EventPayload::GestureLongClick(_) => "gesture_long_click",
            EventPayload::GestureScroll(_) => "gesture_scroll",
            EventPayload::LifecycleActivity(_) => "lifecycle_activity",
            EventPayload::LifecycleFragment(_) => "lifecycle_fragment",
            EventPayload::LifecycleViewController(_) => "lifecycle_view_controller",
            EventPayload::LifecycleSwiftUi(_) => "lifecycle_swift_ui",
            EventPayload::LifecycleApp(_) => "lifecycle_app",
            EventPayload::ColdLaunch(_) => "cold_launch",
            EventPayload::WarmLaunch(_) => "warm_launch",
            EventPayload::HotLaunch(_) => "hot_launch",
            EventPayload::NetworkChange(_) => "network_change",
            EventPayload::Http(_) => "http",
            EventPayload::MemoryUsage(_) => "memory_usage",
            EventPayload::MemoryUsageAbsolute(_) => "memory_usage_absolute",
            EventPayload::LowMemory(_) => "low_memory",
            EventPayload::TrimMemory(_) => "trim_memory",
            EventPayload::CpuUsage(_) => "cpu_usage",
            EventPayload::Navigation(_) => "navigation",
            EventPayload::ScreenView(_) => "screen_view",
            EventPayload::Custom(_) => "custom",
            EventPayload::BugReport(_) => "bug_report",
            EventPayload::SessionStart(_) => "session_start",
        }
    }

    fn decode(tag: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({ "type": tag, "payload": payload }))
    }

    fn encode(&self) -> Result<Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| json!({})))
    }
}

/// The wire shape of an event: common fields plus a single payload keyed
/// by the event's type.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    id: Uuid,
    #[serde(default)]
    app_id: Uuid,
    session_id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    user_triggered: bool,
    #[serde(default)]
    attribute: Attribute,
    #[serde(default)]
    user_defined_attribute: Map<String, Value>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inet_ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inet_ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    inet_country_code: String,
    #[serde(flatten)]
    payloads: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct Event {
    pub id: Uuid,
    pub app_id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_triggered: bool,
    pub attribute: Attribute,
    pub user_defined_attribute: Map<String, Value>,
    pub attachments: Vec<Attachment>,
    pub inet_ipv4: Option<Ipv4Addr>,
    pub inet_ipv6: Option<Ipv6Addr>,
    pub inet_country_code: String,
    pub payload: EventPayload,
}

impl TryFrom<WireEvent> for Event {
    type Error = String;

    fn try_from(mut wire: WireEvent) -> Result<Self, Self::Error> {
        let payload = match wire.payloads.remove(&wire.kind) {
            Some(Value::Null) | None => {
                return Err(format!("event {} of type {:?} has no payload", wire.id, wire.kind))
            }
            Some(value) => value,
        };

        if let Some(other) = EVENT_TYPES
            .iter()
            .find(|tag| wire.payloads.get(**tag).is_some_and(|v| !v.is_null()))
        {
            return Err(format!(
                "event {} of type {:?} also carries a {:?} payload",
                wire.id, wire.kind, other
            ));
        }

        let payload = EventPayload::decode(&wire.kind, payload).map_err(|e| e.to_string())?;

        Ok(Event {
            id: wire.id,
            app_id: wire.app_id,
            session_id: wire.session_id,
            timestamp: wire.timestamp,
            user_triggered: wire.user_triggered,
            attribute: wire.attribute,
            user_defined_attribute: wire.user_defined_attribute,
            attachments: wire.attachments,
            inet_ipv4: wire.inet_ipv4,
            inet_ipv6: wire.inet_ipv6,
            inet_country_code: wire.inet_country_code,
            payload,
        })
    }
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        let kind = event.payload.tag().to_string();
        let mut payloads = Map::new();
        // Every payload type is plain data, encoding cannot fail.
        if let Ok(value) = event.payload.encode() {
            payloads.insert(kind.clone(), value);
        }

        WireEvent {
            id: event.id,
            app_id: event.app_id,
            session_id: event.session_id,
            timestamp: event.timestamp,
            kind,
            user_triggered: event.user_triggered,
            attribute: event.attribute,
            user_defined_attribute: event.user_defined_attribute,
            attachments: event.attachments,
            inet_ipv4: event.inet_ipv4,
            inet_ipv6: event.inet_ipv6,
            inet_country_code: event.inet_country_code,
            payloads,
        }
    }
}

fn custom_name_regex() -> &'static Regex {
    static CUSTOM_NAME: OnceLock<Regex> = OnceLock::new();
    CUSTOM_NAME.get_or_init(|| Regex::new(CUSTOM_NAME_PATTERN).expect("valid custom name pattern"))
}

impl Event {
    pub fn kind(&self) -> &'static str {
        self.payload.tag()
    }

    pub fn os_family(&self) -> Option<OsFamily> {
        OsFamily::from_os_name(&self.attribute.os_name)
    }

    pub fn exception(&self) -> Option<&Exception> {
        match &self.payload {
            EventPayload::Exception(exception) => Some(exception),
            _ => None,
        }
    }

    pub fn anr(&self) -> Option<&Anr> {
        match &self.payload {
            EventPayload::Anr(anr) => Some(anr),
            _ => None,
        }
    }

    pub fn is_unhandled_exception(&self) -> bool {
        self.exception().is_some_and(|e| !e.handled)
    }

    pub fn is_anr(&self) -> bool {
        self.anr().is_some()
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Crash or ANR signature for events that can be grouped into issues.
    pub fn issue_signature(&self) -> Option<IssueSignature> {
        match &self.payload {
            EventPayload::Exception(exception) if !exception.handled => {
                Some(exception.signature())
            }
            EventPayload::Anr(anr) => Some(anr.signature()),
            _ => None,
        }
    }

    /// Class name of the screen this event brings to the front. Pauses,
    /// stops and detaches leave the current screen where it is.
    pub fn screen_name(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::LifecycleActivity(activity)
                if !activity.class_name.is_empty()
                    && SCREEN_ACTIVITY_TYPES.contains(&activity.kind.as_str()) =>
            {
                Some(activity.class_name.as_str())
            }
            EventPayload::LifecycleFragment(fragment)
                if !fragment.class_name.is_empty()
                    && SCREEN_FRAGMENT_TYPES.contains(&fragment.kind.as_str()) =>
            {
                Some(fragment.class_name.as_str())
            }
            _ => None,
        }
    }

    /// Derives launch durations. Anomalies are returned for logging.
    pub fn compute_launch(&mut self) -> Option<LaunchAnomaly> {
        match &mut self.payload {
            EventPayload::ColdLaunch(launch) => launch.compute(),
            EventPayload::WarmLaunch(launch) => launch.compute(),
            EventPayload::HotLaunch(launch) => {
                launch.compute();
                None
            }
            _ => None,
        }
    }

    pub fn compute_fingerprint(&mut self) {
        match &mut self.payload {
            EventPayload::Exception(exception) => exception.compute_fingerprint(),
            EventPayload::Anr(anr) => anr.compute_fingerprint(),
            _ => {}
        }
    }

    /// Whether the event carries obfuscated names or addresses the
    /// symbolicator can resolve.
    pub fn needs_symbolication(&self) -> bool {
        if let EventPayload::Exception(exception) = &self.payload {
            return exception.needs_symbolication();
        }

        if self.os_family() != Some(OsFamily::Android) {
            return false;
        }

        match &self.payload {
            EventPayload::Anr(_) => true,
            EventPayload::AppExit(exit) => !exit.trace.is_empty(),
            EventPayload::LifecycleActivity(activity) => !activity.class_name.is_empty(),
            EventPayload::LifecycleFragment(fragment) => {
                !fragment.class_name.is_empty()
                    || !fragment.parent_activity.is_empty()
                    || !fragment.parent_fragment.is_empty()
            }
            EventPayload::ColdLaunch(launch) => !launch.launched_activity.is_empty(),
            EventPayload::WarmLaunch(launch) => !launch.launched_activity.is_empty(),
            EventPayload::HotLaunch(launch) => !launch.launched_activity.is_empty(),
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind();
        match self.os_family() {
            Some(OsFamily::Android) if ANDROID_EXCLUDED_TYPES.contains(&kind) => {
                return Err(ValidationError::UnsupportedType {
                    kind: kind.to_string(),
                    os: "Android",
                })
            }
            Some(OsFamily::Apple) if APPLE_EXCLUDED_TYPES.contains(&kind) => {
                return Err(ValidationError::UnsupportedType {
                    kind: kind.to_string(),
                    os: "iOS",
                })
            }
            Some(_) => {}
            None => return Err(ValidationError::UnknownOs(self.attribute.os_name.clone())),
        }

        if self.id.is_nil() {
            return Err(ValidationError::Missing("id"));
        }

        if self.app_id.is_nil() {
            return Err(ValidationError::Missing("app_id"));
        }

        if self.session_id.is_nil() {
            return Err(ValidationError::Missing("session_id"));
        }

        check_max_chars("type", kind, MAX_TYPE_CHARS)?;

        if self.timestamp.timestamp_millis() <= 0 {
            return Err(ValidationError::Invalid {
                field: "timestamp",
                reason: "must be a valid ISO 8601 timestamp".to_string(),
            });
        }

        self.attribute.validate()?;
        self.validate_payload()
    }

    fn validate_payload(&self) -> Result<(), ValidationError> {
        let android = self.os_family() == Some(OsFamily::Android);

        match &self.payload {
            EventPayload::Anr(anr) => anr.validate(),
            EventPayload::Exception(exception) => exception.validate(),
            EventPayload::AppExit(exit) => {
                check_present("app_exit.reason", &exit.reason)?;
                check_present("app_exit.importance", &exit.importance)?;
                check_present("app_exit.process_name", &exit.process_name)?;
                check_max_chars("app_exit.reason", &exit.reason, MAX_APP_EXIT_REASON_CHARS)?;
                check_max_chars(
                    "app_exit.importance",
                    &exit.importance,
                    MAX_APP_EXIT_IMPORTANCE_CHARS,
                )
            }
            EventPayload::String(log) => {
                check_present("string.string", &log.string)?;
                check_max_chars(
                    "string.severity_text",
                    &log.severity_text,
                    MAX_SEVERITY_TEXT_CHARS,
                )
            }
            EventPayload::GestureClick(click) | EventPayload::GestureLongClick(click) => {
                check_max_chars("gesture.target", &click.target, MAX_GESTURE_TARGET_CHARS)?;
                check_max_chars(
                    "gesture.target_id",
                    &click.target_id,
                    MAX_GESTURE_TARGET_ID_CHARS,
                )
            }
            EventPayload::GestureScroll(scroll) => {
                check_max_chars(
                    "gesture_scroll.target",
                    &scroll.target,
                    MAX_GESTURE_TARGET_CHARS,
                )?;
                check_max_chars(
                    "gesture_scroll.target_id",
                    &scroll.target_id,
                    MAX_GESTURE_TARGET_ID_CHARS,
                )?;
                check_max_chars(
                    "gesture_scroll.direction",
                    &scroll.direction,
                    MAX_GESTURE_SCROLL_DIRECTION_CHARS,
                )
            }
            EventPayload::LifecycleActivity(activity) => {
                check_present("lifecycle_activity.type", &activity.kind)?;
                check_present("lifecycle_activity.class_name", &activity.class_name)?;
                check_max_chars(
                    "lifecycle_activity.type",
                    &activity.kind,
                    MAX_LIFECYCLE_TYPE_CHARS,
                )?;
                check_max_chars(
                    "lifecycle_activity.class_name",
                    &activity.class_name,
                    MAX_LIFECYCLE_CLASS_NAME_CHARS,
                )
            }
            EventPayload::LifecycleFragment(fragment) => {
                check_present("lifecycle_fragment.type", &fragment.kind)?;
                check_present("lifecycle_fragment.class_name", &fragment.class_name)?;
                check_max_chars(
                    "lifecycle_fragment.type",
                    &fragment.kind,
                    MAX_LIFECYCLE_TYPE_CHARS,
                )?;
                check_max_chars(
                    "lifecycle_fragment.class_name",
                    &fragment.class_name,
                    MAX_LIFECYCLE_CLASS_NAME_CHARS,
                )
            }
            EventPayload::LifecycleViewController(view) => {
                check_present("lifecycle_view_controller.type", &view.kind)?;
                check_present("lifecycle_view_controller.class_name", &view.class_name)?;
                check_max_chars(
                    "lifecycle_view_controller.class_name",
                    &view.class_name,
                    MAX_VIEW_CONTROLLER_CLASS_NAME_CHARS,
                )
            }
            EventPayload::LifecycleSwiftUi(view) => {
                check_present("lifecycle_swift_ui.type", &view.kind)?;
                check_present("lifecycle_swift_ui.class_name", &view.class_name)?;
                check_max_chars(
                    "lifecycle_swift_ui.class_name",
                    &view.class_name,
                    MAX_LIFECYCLE_CLASS_NAME_CHARS,
                )
            }
            EventPayload::LifecycleApp(app) => {
                check_present("lifecycle_app.type", &app.kind)?;
                check_max_chars("lifecycle_app.type", &app.kind, MAX_LIFECYCLE_TYPE_CHARS)
            }
            EventPayload::ColdLaunch(launch) => {
                validate_launched_activity(android, "cold_launch", &launch.launched_activity)
            }
            EventPayload::WarmLaunch(launch) => {
                validate_launched_activity(android, "warm_launch", &launch.launched_activity)
            }
            EventPayload::HotLaunch(launch) => {
                validate_launched_activity(android, "hot_launch", &launch.launched_activity)
            }
            EventPayload::NetworkChange(change) => {
                for (field, value, max) in [
                    (
                        "network_change.network_type",
                        &change.network_type,
                        MAX_NETWORK_TYPE_CHARS,
                    ),
                    (
                        "network_change.previous_network_type",
                        &change.previous_network_type,
                        MAX_NETWORK_TYPE_CHARS,
                    ),
                    (
                        "network_change.network_generation",
                        &change.network_generation,
                        MAX_NETWORK_GENERATION_CHARS,
                    ),
                    (
                        "network_change.previous_network_generation",
                        &change.previous_network_generation,
                        MAX_NETWORK_GENERATION_CHARS,
                    ),
                    (
                        "network_change.network_provider",
                        &change.network_provider,
                        MAX_NETWORK_PROVIDER_CHARS,
                    ),
                ] {
                    check_present(field, value)?;
                    check_max_chars(field, value, max)?;
                }
                Ok(())
            }
            EventPayload::Http(http) => {
                check_present("http.url", &http.url)?;
                check_present("http.method", &http.method)?;
                check_max_chars("http.method", &http.method, MAX_HTTP_METHOD_CHARS)?;
                check_max_chars("http.client", &http.client, MAX_HTTP_CLIENT_CHARS)
            }
            EventPayload::TrimMemory(trim) => {
                check_present("trim_memory.level", &trim.level)?;
                check_max_chars("trim_memory.level", &trim.level, MAX_TRIM_MEMORY_LEVEL_CHARS)
            }
            EventPayload::Navigation(navigation) => {
                check_present("navigation.to", &navigation.to)?;
                check_max_chars("navigation.to", &navigation.to, MAX_NAVIGATION_CHARS)?;
                check_max_chars("navigation.from", &navigation.from, MAX_NAVIGATION_CHARS)?;
                check_max_chars("navigation.source", &navigation.source, MAX_NAVIGATION_CHARS)
            }
            EventPayload::ScreenView(view) => {
                check_present("screen_view.name", &view.name)?;
                check_max_chars("screen_view.name", &view.name, MAX_SCREEN_VIEW_NAME_CHARS)
            }
            EventPayload::Custom(custom) => {
                check_max_chars("custom.name", &custom.name, MAX_CUSTOM_NAME_CHARS)?;
                if !custom_name_regex().is_match(&custom.name) {
                    return Err(ValidationError::Invalid {
                        field: "custom.name",
                        reason: format!("must match pattern {CUSTOM_NAME_PATTERN:?}"),
                    });
                }
                Ok(())
            }
            EventPayload::BugReport(report) => check_max_chars(
                "bug_report.description",
                &report.description,
                MAX_BUG_REPORT_DESCRIPTION_CHARS,
            ),
            EventPayload::MemoryUsage(_)
            | EventPayload::MemoryUsageAbsolute(_)
            | EventPayload::LowMemory(_)
            | EventPayload::CpuUsage(_)
            | EventPayload::SessionStart(_) => Ok(()),
        }
    }
}

fn validate_launched_activity(
    android: bool,
    field: &'static str,
    launched_activity: &str,
) -> Result<(), ValidationError> {
    if android && launched_activity.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    check_max_chars(field, launched_activity, MAX_LAUNCHED_ACTIVITY_CHARS)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::attribute::tests::android_attribute;
    use crate::exception::tests::jvm_exception;

    pub fn event_json(kind: &str, payload: Value) -> Value {
        let mut value = json!({
            "id": Uuid::now_v7(),
            "app_id": Uuid::now_v7(),
            "session_id": Uuid::now_v7(),
            "timestamp": "2024-06-01T10:00:00.000Z",
            "type": kind,
            "user_triggered": false,
            "attribute": android_attribute(),
            "attachments": [],
        });
        value[kind] = payload;
        value
    }

    pub fn make_event(payload: EventPayload) -> Event {
        Event {
            id: Uuid::now_v7(),
            app_id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
            user_triggered: false,
            attribute: android_attribute(),
            user_defined_attribute: Map::new(),
            attachments: vec![],
            inet_ipv4: None,
            inet_ipv6: None,
            inet_country_code: String::new(),
            payload,
        }
    }

    #[test]
    fn test_decode_tagged_payload() {
        let raw = event_json(
            "lifecycle_activity",
            json!({"type": "created", "class_name": "sh.measure.MainActivity"}),
        );
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind(), "lifecycle_activity");
        assert_eq!(event.screen_name(), Some("sh.measure.MainActivity"));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_only_entering_lifecycle_types_name_a_screen() {
        let activity = |kind: &str| {
            make_event(EventPayload::LifecycleActivity(LifecycleActivity {
                kind: kind.to_string(),
                class_name: "sh.measure.MainActivity".to_string(),
                ..Default::default()
            }))
        };
        let fragment = |kind: &str| {
            make_event(EventPayload::LifecycleFragment(LifecycleFragment {
                kind: kind.to_string(),
                class_name: "sh.measure.HomeFragment".to_string(),
                ..Default::default()
            }))
        };

        assert_eq!(activity("resumed").screen_name(), Some("sh.measure.MainActivity"));
        assert_eq!(activity("paused").screen_name(), None);
        assert_eq!(activity("stopped").screen_name(), None);
        assert_eq!(activity("destroyed").screen_name(), None);
        assert_eq!(fragment("attached").screen_name(), Some("sh.measure.HomeFragment"));
        assert_eq!(fragment("resumed").screen_name(), Some("sh.measure.HomeFragment"));
        assert_eq!(fragment("paused").screen_name(), None);
        assert_eq!(fragment("detached").screen_name(), None);
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        let mut raw = event_json("exception", json!(null));
        raw.as_object_mut().unwrap().remove("exception");
        assert!(serde_json::from_value::<Event>(raw).is_err());
    }

    #[test]
    fn test_decode_rejects_second_payload() {
        let mut raw = event_json("screen_view", json!({"name": "home"}));
        raw["custom"] = json!({"name": "other"});
        assert!(serde_json::from_value::<Event>(raw).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = event_json("teleport", json!({}));
        assert!(serde_json::from_value::<Event>(raw).is_err());
    }

    #[test]
    fn test_wire_shape_is_preserved() {
        let raw = event_json("screen_view", json!({"name": "home"}));
        let event: Event = serde_json::from_value(raw.clone()).unwrap();
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "screen_view");
        assert_eq!(encoded["screen_view"]["name"], "home");
        assert_eq!(encoded["id"], raw["id"]);
    }

    #[test]
    fn test_os_type_whitelist() {
        let mut event = make_event(EventPayload::LifecycleViewController(LifecycleView {
            kind: "viewDidLoad".to_string(),
            class_name: "HomeViewController".to_string(),
        }));
        assert!(matches!(
            event.validate(),
            Err(ValidationError::UnsupportedType { .. })
        ));

        event.attribute.os_name = "ios".to_string();
        assert!(event.validate().is_ok());

        let mut anr = make_event(EventPayload::Anr(Anr::default()));
        anr.attribute.os_name = "ios".to_string();
        assert!(matches!(
            anr.validate(),
            Err(ValidationError::UnsupportedType { .. })
        ));

        let mut unknown = make_event(EventPayload::SessionStart(SessionStart {}));
        unknown.attribute.os_name = "symbian".to_string();
        assert_eq!(
            unknown.validate(),
            Err(ValidationError::UnknownOs("symbian".to_string()))
        );
    }

    #[test]
    fn test_event_requires_ids() {
        let mut event = make_event(EventPayload::SessionStart(SessionStart {}));
        event.app_id = Uuid::nil();
        assert_eq!(event.validate(), Err(ValidationError::Missing("app_id")));
    }

    #[test]
    fn test_custom_name_pattern() {
        let ok = make_event(EventPayload::Custom(Custom {
            name: "checkout_started".to_string(),
        }));
        assert!(ok.validate().is_ok());

        let bad = make_event(EventPayload::Custom(Custom {
            name: "checkout started!".to_string(),
        }));
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::Invalid {
                field: "custom.name",
                ..
            })
        ));
    }

    #[test]
    fn test_needs_symbolication() {
        let exception = make_event(EventPayload::Exception(jvm_exception()));
        assert!(exception.needs_symbolication());

        let activity = make_event(EventPayload::LifecycleActivity(LifecycleActivity {
            kind: "created".to_string(),
            class_name: "a.b".to_string(),
            ..Default::default()
        }));
        assert!(activity.needs_symbolication());

        let mut ios_launch = make_event(EventPayload::ColdLaunch(ColdLaunch {
            launched_activity: "a.b".to_string(),
            ..Default::default()
        }));
        ios_launch.attribute.os_name = "ios".to_string();
        assert!(!ios_launch.needs_symbolication());

        let exit = make_event(EventPayload::AppExit(AppExit::default()));
        assert!(!exit.needs_symbolication());

        let view = make_event(EventPayload::ScreenView(ScreenView {
            name: "home".to_string(),
        }));
        assert!(!view.needs_symbolication());
    }

    #[test]
    fn test_issue_signature_only_for_unhandled() {
        let mut handled = jvm_exception();
        handled.handled = true;
        assert!(make_event(EventPayload::Exception(handled))
            .issue_signature()
            .is_none());

        let unhandled = make_event(EventPayload::Exception(jvm_exception()));
        assert!(unhandled.is_unhandled_exception());
        assert!(unhandled.issue_signature().is_some());
    }

    #[test]
    fn test_compute_launch() {
        let mut event = make_event(EventPayload::ColdLaunch(ColdLaunch {
            process_start_uptime: 1000,
            on_next_draw_uptime: 2500,
            launched_activity: "a.b".to_string(),
            ..Default::default()
        }));
        assert_eq!(event.compute_launch(), None);
        match &event.payload {
            EventPayload::ColdLaunch(launch) => assert_eq!(launch.duration, 1500),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
