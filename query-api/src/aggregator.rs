use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use common_metrics::timing_guard;
use common_types::{AppFilter, AppFilterParams, LaunchKind, OsFamily};
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{ApiError, Result};
use crate::groups::{build_sizes, find_app, App, BuildSizes};
use crate::store::{EventStore, QueryError, SessionCounts, VersionScope};

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of sessions free of an issue, NaN without sessions.
pub fn issue_free(issue_sessions: u64, sessions: u64) -> f64 {
    if sessions == 0 {
        return f64::NAN;
    }
    round2((1.0 - issue_sessions as f64 / sessions as f64) * 100.0)
}

/// Ratio of the selected value to the unselected one. An unselected value
/// of zero leaves nothing to compare against and counts as no change.
pub fn delta(selected: f64, unselected: f64) -> f64 {
    if selected.is_nan() {
        return f64::NAN;
    }
    if unselected.is_nan() || unselected == 0.0 {
        return 1.0;
    }
    round2(selected / unselected)
}

/// A value with its comparison against unselected versions. NaN values are
/// reported as zero with the matching flag set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metric {
    pub value: f64,
    pub delta: f64,
    pub nan: bool,
    pub delta_nan: bool,
}

impl Metric {
    pub fn new(value: f64, delta: f64) -> Self {
        Metric {
            value: if value.is_nan() { 0.0 } else { value },
            delta: if delta.is_nan() { 0.0 } else { delta },
            nan: value.is_nan(),
            delta_nan: delta.is_nan(),
        }
    }

    pub fn compare(selected: f64, unselected: f64) -> Self {
        Metric::new(selected, delta(selected, unselected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Adoption {
    pub all_versions: u64,
    pub selected_version: u64,
    pub adoption: f64,
    pub nan: bool,
}

impl Adoption {
    pub fn new(selected_version: u64, all_versions: u64) -> Self {
        let (adoption, nan) = if all_versions == 0 {
            (0.0, true)
        } else {
            (
                round2(selected_version as f64 / all_versions as f64 * 100.0),
                false,
            )
        };
        Adoption {
            all_versions,
            selected_version,
            adoption,
            nan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizeMetric {
    pub average_app_size: f64,
    pub selected_app_size: f64,
    pub delta: f64,
    pub nan: bool,
}

impl SizeMetric {
    pub fn new(sizes: BuildSizes) -> Self {
        SizeMetric {
            average_app_size: round2(sizes.average),
            selected_app_size: round2(sizes.selected),
            delta: round2(sizes.selected - sizes.average),
            nan: false,
        }
    }

    /// Apps that never reported a build have nothing to size.
    pub fn not_onboarded() -> Self {
        SizeMetric {
            average_app_size: 0.0,
            selected_app_size: 0.0,
            delta: 0.0,
            nan: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppMetrics {
    pub cold_launch: Metric,
    pub warm_launch: Metric,
    pub hot_launch: Metric,
    pub crash_free_sessions: Metric,
    pub perceived_crash_free_sessions: Metric,
    /// Android only.
    pub anr_free_sessions: Option<Metric>,
    /// Android only.
    pub perceived_anr_free_sessions: Option<Metric>,
    pub adoption: Adoption,
    pub sizes: Option<SizeMetric>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionMetrics {
    pub crash_free_sessions: Metric,
    pub perceived_crash_free_sessions: Metric,
    pub anr_free_sessions: Metric,
    pub perceived_anr_free_sessions: Metric,
}

impl SessionMetrics {
    pub fn new(selected: SessionCounts, unselected: SessionCounts) -> Self {
        let compare = |issues: fn(&SessionCounts) -> u64| {
            Metric::compare(
                issue_free(issues(&selected), selected.sessions),
                issue_free(issues(&unselected), unselected.sessions),
            )
        };

        SessionMetrics {
            crash_free_sessions: compare(|c| c.crash_sessions),
            perceived_crash_free_sessions: compare(|c| c.perceived_crash_sessions),
            anr_free_sessions: compare(|c| c.anr_sessions),
            perceived_anr_free_sessions: compare(|c| c.perceived_anr_sessions),
        }
    }
}

async fn launch_metric(
    store: &dyn EventStore,
    filter: &AppFilter,
    kind: LaunchKind,
) -> std::result::Result<Metric, QueryError> {
    let (selected, unselected) = tokio::try_join!(
        store.launch_p95(filter, kind, VersionScope::Selected),
        store.launch_p95(filter, kind, VersionScope::Unselected),
    )?;

    let selected = selected.map(round2).unwrap_or(f64::NAN);
    let unselected = unselected.map(round2).unwrap_or(f64::NAN);
    Ok(Metric::compare(selected, unselected))
}

async fn size_metric(
    state: &AppState,
    app: &App,
    filter: &AppFilter,
) -> std::result::Result<Option<SizeMetric>, sqlx::Error> {
    if !app.onboarded {
        return Ok(Some(SizeMetric::not_onboarded()));
    }

    let Some((version, code)) = filter.version_pairs().into_iter().next() else {
        return Ok(None);
    };

    let sizes = build_sizes(&state.pg_pool, app.id, &version, &code).await?;
    Ok(sizes.map(SizeMetric::new))
}

pub async fn compute_metrics(state: &AppState, app: &App, filter: &AppFilter) -> Result<AppMetrics> {
    let store = state.events.as_ref();
    let _timer = timing_guard("query_metrics_duration_ms");

    let (cold_launch, warm_launch, hot_launch, selected, unselected, all) = tokio::try_join!(
        launch_metric(store, filter, LaunchKind::Cold),
        launch_metric(store, filter, LaunchKind::Warm),
        launch_metric(store, filter, LaunchKind::Hot),
        store.session_counts(filter, VersionScope::Selected),
        store.session_counts(filter, VersionScope::Unselected),
        store.session_counts(filter, VersionScope::All),
    )?;

    let sizes = size_metric(state, app, filter).await?;
    let sessions = SessionMetrics::new(selected, unselected);

    let android = app
        .os_name
        .as_deref()
        .and_then(OsFamily::from_os_name)
        == Some(OsFamily::Android);

    Ok(AppMetrics {
        cold_launch,
        warm_launch,
        hot_launch,
        crash_free_sessions: sessions.crash_free_sessions,
        perceived_crash_free_sessions: sessions.perceived_crash_free_sessions,
        anr_free_sessions: android.then_some(sessions.anr_free_sessions),
        perceived_anr_free_sessions: android.then_some(sessions.perceived_anr_free_sessions),
        adoption: Adoption::new(selected.sessions, all.sessions),
        sizes,
    })
}

pub async fn get_metrics(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(params): Query<AppFilterParams>,
) -> Result<Json<AppMetrics>> {
    let filter = AppFilter::from_params(app_id, &params, Utc::now())?;
    let app = find_app(&state.pg_pool, app_id)
        .await?
        .ok_or(ApiError::AppNotFound(app_id))?;

    Ok(Json(compute_metrics(&state, &app, &filter).await?))
}
