use serde::{Deserialize, Serialize};

pub const ANDROID: &str = "android";
pub const IOS: &str = "ios";
pub const IPADOS: &str = "ipados";

/// Families of operating systems the SDKs report from. Validation rules
/// and symbolication behaviour branch on the family, not the exact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Android,
    Apple,
}

impl OsFamily {
    pub fn from_os_name(os_name: &str) -> Option<OsFamily> {
        match os_name.trim().to_lowercase().as_str() {
            ANDROID => Some(OsFamily::Android),
            IOS | IPADOS => Some(OsFamily::Apple),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Android => "android",
            OsFamily::Apple => "apple",
        }
    }
}
