use serde::{Deserialize, Serialize};

/// Cold launches taking longer than this are logged as anomalies and
/// excluded from percentile computations.
pub const NOMINAL_COLD_LAUNCH_THRESHOLD_MS: i64 = 30_000;

/// Warm launches taking longer than this are logged as anomalies.
pub const NOMINAL_WARM_LAUNCH_THRESHOLD_MS: i64 = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdLaunch {
    pub process_start_uptime: u64,
    pub process_start_requested_uptime: u64,
    pub content_provider_attach_uptime: u64,
    pub on_next_draw_uptime: u64,
    pub launched_activity: String,
    pub has_saved_state: bool,
    pub intent_data: String,
    /// Milliseconds, derived at parse time.
    pub duration: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmLaunch {
    pub app_visible_uptime: u64,
    pub process_start_uptime: u64,
    pub process_start_requested_uptime: u64,
    pub content_provider_attach_uptime: u64,
    pub on_next_draw_uptime: u64,
    pub launched_activity: String,
    pub has_saved_state: bool,
    pub intent_data: String,
    pub is_lukewarm: bool,
    /// Milliseconds, derived at parse time.
    pub duration: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotLaunch {
    pub app_visible_uptime: u64,
    pub on_next_draw_uptime: u64,
    pub launched_activity: String,
    pub has_saved_state: bool,
    pub intent_data: String,
    /// Milliseconds, derived at parse time.
    pub duration: i64,
}

/// Something odd about a computed launch duration. Anomalies are logged,
/// never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchAnomaly {
    ColdAboveThreshold,
    WarmAboveThreshold,
    WarmWithoutVisibleUptime,
}

fn signed_delta(end: u64, start: u64) -> i64 {
    let end = i64::try_from(end).unwrap_or(i64::MAX);
    let start = i64::try_from(start).unwrap_or(i64::MAX);
    end.saturating_sub(start)
}

impl ColdLaunch {
    /// Android reports different process uptimes across api levels, so
    /// the most precise one available wins.
    pub fn compute(&mut self) -> Option<LaunchAnomaly> {
        let mut uptime = self.process_start_requested_uptime;
        if uptime < 1 {
            uptime = self.process_start_uptime;
        }
        if uptime < 1 {
            uptime = self.content_provider_attach_uptime;
        }

        self.duration = signed_delta(self.on_next_draw_uptime, uptime);

        if self.duration > NOMINAL_COLD_LAUNCH_THRESHOLD_MS {
            return Some(LaunchAnomaly::ColdAboveThreshold);
        }
        None
    }
}

impl WarmLaunch {
    pub fn compute(&mut self) -> Option<LaunchAnomaly> {
        if self.is_lukewarm {
            self.duration = 0;
            return None;
        }

        if self.app_visible_uptime < 1 {
            self.duration = 0;
            return Some(LaunchAnomaly::WarmWithoutVisibleUptime);
        }

        self.duration = signed_delta(self.on_next_draw_uptime, self.app_visible_uptime);

        if self.duration > NOMINAL_WARM_LAUNCH_THRESHOLD_MS {
            return Some(LaunchAnomaly::WarmAboveThreshold);
        }
        None
    }
}

impl HotLaunch {
    pub fn compute(&mut self) {
        self.duration = signed_delta(self.on_next_draw_uptime, self.app_visible_uptime);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchKind {
    Cold,
    Warm,
    Hot,
}

impl LaunchKind {
    pub const ALL: [LaunchKind; 3] = [LaunchKind::Cold, LaunchKind::Warm, LaunchKind::Hot];

    /// Inclusive upper bound on durations that count towards percentiles.
    pub fn ceiling_ms(&self) -> Option<i64> {
        match self {
            LaunchKind::Cold => Some(NOMINAL_COLD_LAUNCH_THRESHOLD_MS),
            LaunchKind::Warm | LaunchKind::Hot => None,
        }
    }

    /// Whether a duration takes part in percentile computations.
    pub fn includes(&self, duration_ms: i64) -> bool {
        if duration_ms <= 0 {
            return false;
        }
        match self.ceiling_ms() {
            Some(ceiling) => duration_ms <= ceiling,
            None => true,
        }
    }

    /// The same bounds as `includes`, rendered as a SQL predicate over `column`.
    pub fn sql_bounds(&self, column: &str) -> String {
        match self.ceiling_ms() {
            Some(ceiling) => format!("{column} > 0 AND {column} <= {ceiling}"),
            None => format!("{column} > 0"),
        }
    }
}

/// Nearest-rank 95th percentile over the durations `kind` includes.
pub fn p95(kind: LaunchKind, durations: &[i64]) -> Option<f64> {
    let mut included: Vec<i64> = durations
        .iter()
        .copied()
        .filter(|d| kind.includes(*d))
        .collect();

    if included.is_empty() {
        return None;
    }

    included.sort_unstable();
    let rank = (included.len() * 95).div_ceil(100);
    let index = rank.saturating_sub(1).min(included.len() - 1);
    Some(included[index] as f64)
}
