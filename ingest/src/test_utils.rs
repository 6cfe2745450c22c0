use chrono::Utc;
use common_types::exception::{ExceptionUnit, Frame, Thread};
use common_types::{Attribute, Event, EventPayload, Exception};
use serde_json::Map;
use uuid::Uuid;

pub fn android_attribute() -> Attribute {
    Attribute {
        installation_id: Uuid::now_v7(),
        app_version: "1.0.0".to_string(),
        app_build: "100".to_string(),
        app_unique_id: "sh.measure.sample".to_string(),
        platform: "android".to_string(),
        measure_sdk_version: "0.9.0".to_string(),
        thread_name: "main".to_string(),
        device_manufacturer: "Google".to_string(),
        device_model: "Pixel 8".to_string(),
        device_locale: "en-US".to_string(),
        os_name: "android".to_string(),
        os_version: "34".to_string(),
        network_type: "wifi".to_string(),
        ..Default::default()
    }
}

pub fn make_event(app_id: Uuid, payload: EventPayload) -> Event {
    Event {
        id: Uuid::now_v7(),
        app_id,
        session_id: Uuid::now_v7(),
        timestamp: Utc::now(),
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

pub fn unhandled_exception() -> Exception {
    Exception {
        handled: false,
        exceptions: vec![ExceptionUnit {
            kind: "java.lang.IllegalStateException".to_string(),
            message: "boom".to_string(),
            frames: vec![Frame {
                class_name: "a.b".to_string(),
                method_name: "onClick".to_string(),
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
    }
}
