use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{check_max_chars, check_present, ValidationError};

const MAX_APP_VERSION_CHARS: usize = 128;
const MAX_APP_BUILD_CHARS: usize = 32;
const MAX_APP_UNIQUE_ID_CHARS: usize = 128;
const MAX_PLATFORM_CHARS: usize = 32;
const MAX_MEASURE_SDK_VERSION_CHARS: usize = 16;
const MAX_THREAD_NAME_CHARS: usize = 128;
const MAX_USER_ID_CHARS: usize = 128;
const MAX_DEVICE_NAME_CHARS: usize = 32;
const MAX_DEVICE_MODEL_CHARS: usize = 32;
const MAX_DEVICE_MANUFACTURER_CHARS: usize = 32;
const MAX_DEVICE_TYPE_CHARS: usize = 32;
const MAX_DEVICE_LOCALE_CHARS: usize = 64;
const MAX_OS_NAME_CHARS: usize = 32;
const MAX_OS_VERSION_CHARS: usize = 32;
const MAX_NETWORK_TYPE_CHARS: usize = 16;
const MAX_NETWORK_PROVIDER_CHARS: usize = 64;
const MAX_NETWORK_GENERATION_CHARS: usize = 16;

/// Client-side context attached to every event: app build, device, os and
/// network at the time the event was recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribute {
    pub installation_id: Uuid,
    pub app_version: String,
    pub app_build: String,
    pub app_unique_id: String,
    pub platform: String,
    pub measure_sdk_version: String,
    pub thread_name: String,
    pub user_id: String,
    pub device_name: String,
    pub device_model: String,
    pub device_manufacturer: String,
    pub device_type: String,
    pub device_is_foldable: bool,
    pub device_is_physical: bool,
    pub device_density_dpi: u16,
    pub device_width_px: u16,
    pub device_height_px: u16,
    pub device_density: f32,
    pub device_locale: String,
    pub device_low_power_mode: bool,
    pub device_thermal_throttling_enabled: bool,
    pub os_name: String,
    pub os_version: String,
    pub os_page_size: u8,
    pub network_type: String,
    pub network_provider: String,
    pub network_generation: String,
}

impl Attribute {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.installation_id.is_nil() {
            return Err(ValidationError::Missing("attribute.installation_id"));
        }

        check_present("attribute.app_version", &self.app_version)?;
        check_present("attribute.app_build", &self.app_build)?;
        check_present("attribute.app_unique_id", &self.app_unique_id)?;
        check_present("attribute.measure_sdk_version", &self.measure_sdk_version)?;
        check_present("attribute.os_name", &self.os_name)?;

        let ceilings: [(&'static str, &str, usize); 17] = [
            ("attribute.app_version", &self.app_version, MAX_APP_VERSION_CHARS),
            ("attribute.app_build", &self.app_build, MAX_APP_BUILD_CHARS),
            ("attribute.app_unique_id", &self.app_unique_id, MAX_APP_UNIQUE_ID_CHARS),
            ("attribute.platform", &self.platform, MAX_PLATFORM_CHARS),
            (
                "attribute.measure_sdk_version",
                &self.measure_sdk_version,
                MAX_MEASURE_SDK_VERSION_CHARS,
            ),
            ("attribute.thread_name", &self.thread_name, MAX_THREAD_NAME_CHARS),
            ("attribute.user_id", &self.user_id, MAX_USER_ID_CHARS),
            ("attribute.device_name", &self.device_name, MAX_DEVICE_NAME_CHARS),
            ("attribute.device_model", &self.device_model, MAX_DEVICE_MODEL_CHARS),
            (
                "attribute.device_manufacturer",
                &self.device_manufacturer,
                MAX_DEVICE_MANUFACTURER_CHARS,
            ),
            ("attribute.device_type", &self.device_type, MAX_DEVICE_TYPE_CHARS),
            ("attribute.device_locale", &self.device_locale, MAX_DEVICE_LOCALE_CHARS),
            ("attribute.os_name", &self.os_name, MAX_OS_NAME_CHARS),
            ("attribute.os_version", &self.os_version, MAX_OS_VERSION_CHARS),
            ("attribute.network_type", &self.network_type, MAX_NETWORK_TYPE_CHARS),
            (
                "attribute.network_provider",
                &self.network_provider,
                MAX_NETWORK_PROVIDER_CHARS,
            ),
            (
                "attribute.network_generation",
                &self.network_generation,
                MAX_NETWORK_GENERATION_CHARS,
            ),
        ];

        for (field, value, max) in ceilings {
            check_max_chars(field, value, max)?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

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

    #[test]
    fn test_valid_attribute() {
        assert_eq!(android_attribute().validate(), Ok(()));
    }

    #[test]
    fn test_missing_installation_id() {
        let attribute = Attribute {
            installation_id: Uuid::nil(),
            ..android_attribute()
        };
        assert_eq!(
            attribute.validate(),
            Err(ValidationError::Missing("attribute.installation_id"))
        );
    }

    #[test]
    fn test_missing_os_name() {
        let attribute = Attribute {
            os_name: String::new(),
            ..android_attribute()
        };
        assert_eq!(
            attribute.validate(),
            Err(ValidationError::Missing("attribute.os_name"))
        );
    }

    #[test]
    fn test_locale_too_long() {
        let attribute = Attribute {
            device_locale: "x".repeat(MAX_DEVICE_LOCALE_CHARS + 1),
            ..android_attribute()
        };
        assert_eq!(
            attribute.validate(),
            Err(ValidationError::TooLong {
                field: "attribute.device_locale",
                max: MAX_DEVICE_LOCALE_CHARS
            })
        );
    }
}
