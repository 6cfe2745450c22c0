use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 1000;
pub const DEFAULT_RANGE_DAYS: i64 = 7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("both `from` and `to` time values are required")]
    PartialTimeRange,
    #[error("`to` must be later than `from`")]
    InvertedTimeRange,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("`limit` cannot be zero")]
    ZeroLimit,
    #[error("`limit` cannot be more than {MAX_LIMIT}")]
    LimitTooLarge,
    #[error("invalid limit {0:?}")]
    InvalidLimit(String),
    #[error("both `key_id` and `key_timestamp` are required for keyset pagination")]
    PartialKeyset,
    #[error("invalid keyset id {0:?}")]
    InvalidKeyId(String),
    #[error("backward pagination requires a keyset")]
    BackwardWithoutKeyset,
    #[error("`versions` and `version_codes` must be of the same length")]
    VersionMismatch,
}

/// Raw query string parameters, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppFilterParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub versions: Option<String>,
    pub version_codes: Option<String>,
    pub os_names: Option<String>,
    pub os_versions: Option<String>,
    pub countries: Option<String>,
    pub device_names: Option<String>,
    pub device_manufacturers: Option<String>,
    pub locales: Option<String>,
    pub network_providers: Option<String>,
    pub network_types: Option<String>,
    pub network_generations: Option<String>,
    pub free_text: Option<String>,
    pub limit: Option<String>,
    pub key_id: Option<String>,
    pub key_timestamp: Option<String>,
    pub bigraph: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn operator(&self) -> &'static str {
        match self {
            Direction::Forward => ">",
            Direction::Backward => "<",
        }
    }

    pub fn order(&self) -> &'static str {
        match self {
            Direction::Forward => "ASC",
            Direction::Backward => "DESC",
        }
    }
}

/// Position of the last row a client has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keyset {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppFilter {
    pub app_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub versions: Vec<String>,
    pub version_codes: Vec<String>,
    pub os_names: Vec<String>,
    pub os_versions: Vec<String>,
    pub countries: Vec<String>,
    pub device_names: Vec<String>,
    pub device_manufacturers: Vec<String>,
    pub locales: Vec<String>,
    pub network_providers: Vec<String>,
    pub network_types: Vec<String>,
    pub network_generations: Vec<String>,
    pub free_text: String,
    pub limit: i64,
    pub keyset: Option<Keyset>,
    pub bigraph: bool,
}

fn split_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, FilterError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| FilterError::InvalidTimestamp(value.to_string()))
}

impl AppFilter {
    pub fn from_params(
        app_id: Uuid,
        params: &AppFilterParams,
        now: DateTime<Utc>,
    ) -> Result<AppFilter, FilterError> {
        let (from, to) = match (params.from.as_deref(), params.to.as_deref()) {
            (Some(from), Some(to)) => (parse_timestamp(from)?, parse_timestamp(to)?),
            (None, None) => (now - Duration::days(DEFAULT_RANGE_DAYS), now),
            _ => return Err(FilterError::PartialTimeRange),
        };

        if to < from {
            return Err(FilterError::InvertedTimeRange);
        }

        let limit = match params.limit.as_deref() {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| FilterError::InvalidLimit(raw.to_string()))?,
            None => DEFAULT_LIMIT,
        };

        if limit == 0 {
            return Err(FilterError::ZeroLimit);
        }

        if limit.unsigned_abs() > MAX_LIMIT.unsigned_abs() {
            return Err(FilterError::LimitTooLarge);
        }

        let keyset = match (params.key_id.as_deref(), params.key_timestamp.as_deref()) {
            (Some(id), Some(timestamp)) => Some(Keyset {
                id: Uuid::parse_str(id).map_err(|_| FilterError::InvalidKeyId(id.to_string()))?,
                timestamp: parse_timestamp(timestamp)?,
            }),
            (None, None) => None,
            _ => return Err(FilterError::PartialKeyset),
        };

        let versions = split_list(params.versions.as_ref());
        let version_codes = split_list(params.version_codes.as_ref());
        if versions.len() != version_codes.len() {
            return Err(FilterError::VersionMismatch);
        }

        Ok(AppFilter {
            app_id,
            from,
            to,
            versions,
            version_codes,
            os_names: split_list(params.os_names.as_ref()),
            os_versions: split_list(params.os_versions.as_ref()),
            countries: split_list(params.countries.as_ref()),
            device_names: split_list(params.device_names.as_ref()),
            device_manufacturers: split_list(params.device_manufacturers.as_ref()),
            locales: split_list(params.locales.as_ref()),
            network_providers: split_list(params.network_providers.as_ref()),
            network_types: split_list(params.network_types.as_ref()),
            network_generations: split_list(params.network_generations.as_ref()),
            free_text: params.free_text.clone().unwrap_or_default(),
            limit,
            keyset,
            bigraph: params.bigraph.unwrap_or(false),
        })
    }

    pub fn direction(&self) -> Direction {
        if self.limit < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    pub fn has_keyset(&self) -> bool {
        self.keyset.is_some()
    }

    pub fn has_versions(&self) -> bool {
        !self.versions.is_empty()
    }

    pub fn page_size(&self) -> usize {
        usize::try_from(self.limit.unsigned_abs()).unwrap_or(usize::MAX)
    }

    /// One more row than the page size, to detect further pages.
    pub fn extended_limit(&self) -> usize {
        self.page_size().saturating_add(1)
    }

    /// `(version, version_code)` pairs as selected by the client.
    pub fn version_pairs(&self) -> Vec<(String, String)> {
        self.versions
            .iter()
            .cloned()
            .zip(self.version_codes.iter().cloned())
            .collect()
    }

    /// Pagination needs an anchor to walk backwards from.
    pub fn validate_pagination(&self) -> Result<(), FilterError> {
        if self.direction() == Direction::Backward && !self.has_keyset() {
            return Err(FilterError::BackwardWithoutKeyset);
        }
        Ok(())
    }
}
