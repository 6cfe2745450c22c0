use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use common_types::{AppFilter, AppFilterParams, Direction, IssueGroup, IssueKind};
use common_metrics::timing_guard;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{ApiError, Result};
use crate::groups::find_group;
use crate::presign::sign_attachments;
use crate::store::IssueEvent;

/// One page of rows in ascending `(timestamp, id)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub next: bool,
    pub previous: bool,
}

/// Turns `extended_limit` rows fetched in the filter's direction into a
/// page. The extra row only tells whether more rows lie in the fetch
/// direction; the opposite flag follows from the keyset.
pub fn paginate<T>(mut rows: Vec<T>, filter: &AppFilter) -> Page<T> {
    let page_size = filter.page_size();
    let has_more = rows.len() > page_size;
    rows.truncate(page_size);

    match filter.direction() {
        Direction::Forward => Page {
            results: rows,
            next: has_more,
            previous: filter.has_keyset(),
        },
        Direction::Backward => {
            rows.reverse();
            Page {
                results: rows,
                next: true,
                previous: has_more,
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub next: bool,
    pub previous: bool,
}

#[derive(Debug, Serialize)]
pub struct IssueEventsResponse {
    pub results: Vec<Value>,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    #[serde(flatten)]
    pub group: IssueGroup,
    pub event_ids: Vec<Uuid>,
}

fn group_kind_name(kind: IssueKind) -> &'static str {
    match kind {
        IssueKind::Exception => "crash",
        IssueKind::Anr => "anr",
    }
}

async fn group_for(
    state: &AppState,
    kind: IssueKind,
    app_id: Uuid,
    group_id: Uuid,
) -> Result<IssueGroup> {
    find_group(&state.pg_pool, kind, app_id, group_id)
        .await?
        .ok_or(ApiError::GroupNotFound {
            kind: group_kind_name(kind),
            id: group_id,
        })
}

async fn event_json(state: &AppState, event: IssueEvent) -> Value {
    let attachments = sign_attachments(state.signer.as_ref(), event.attachments).await;

    let mut body = Map::new();
    body.insert("id".to_string(), json!(event.id));
    body.insert("session_id".to_string(), json!(event.session_id));
    body.insert("timestamp".to_string(), json!(event.timestamp));
    body.insert("type".to_string(), json!(event.kind.event_type()));
    body.insert(
        "attribute".to_string(),
        json!({
            "installation_id": event.attribute.installation_id,
            "app_version": event.attribute.app_version,
            "app_build": event.attribute.app_build,
            "user_id": event.attribute.user_id,
            "device_manufacturer": event.attribute.device_manufacturer,
            "device_model": event.attribute.device_model,
            "network_type": event.attribute.network_type,
            "os_name": event.attribute.os_name,
            "os_version": event.attribute.os_version,
            "thread_name": event.attribute.thread_name,
        }),
    );
    body.insert(event.kind.as_str().to_string(), event.payload);
    body.insert("attachments".to_string(), json!(attachments));
    Value::Object(body)
}

async fn issue_events(
    state: AppState,
    kind: IssueKind,
    app_id: Uuid,
    group_id: Uuid,
    params: AppFilterParams,
    now: DateTime<Utc>,
) -> Result<Json<IssueEventsResponse>> {
    let filter = AppFilter::from_params(app_id, &params, now)?;
    filter.validate_pagination()?;

    let group = group_for(&state, kind, app_id, group_id).await?;

    let timer = timing_guard("query_issue_events_duration_ms").label("kind", kind.as_str());
    let rows = state
        .events
        .issue_events(&filter, kind, &group.fingerprint)
        .await?;
    timer.fin();

    let page = paginate(rows, &filter);

    let mut results = Vec::with_capacity(page.results.len());
    for event in page.results {
        results.push(event_json(&state, event).await);
    }

    Ok(Json(IssueEventsResponse {
        results,
        meta: Meta {
            next: page.next,
            previous: page.previous,
        },
    }))
}

async fn group_detail(
    state: AppState,
    kind: IssueKind,
    app_id: Uuid,
    group_id: Uuid,
) -> Result<Json<GroupResponse>> {
    let group = group_for(&state, kind, app_id, group_id).await?;
    let event_ids = state
        .events
        .issue_event_ids(app_id, kind, &group.fingerprint)
        .await?;

    Ok(Json(GroupResponse { group, event_ids }))
}

pub async fn get_crash_group(
    State(state): State<AppState>,
    Path((app_id, group_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<GroupResponse>> {
    group_detail(state, IssueKind::Exception, app_id, group_id).await
}

pub async fn get_anr_group(
    State(state): State<AppState>,
    Path((app_id, group_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<GroupResponse>> {
    group_detail(state, IssueKind::Anr, app_id, group_id).await
}

pub async fn get_crash_group_crashes(
    State(state): State<AppState>,
    Path((app_id, group_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<AppFilterParams>,
) -> Result<Json<IssueEventsResponse>> {
    issue_events(state, IssueKind::Exception, app_id, group_id, params, Utc::now()).await
}

pub async fn get_anr_group_anrs(
    State(state): State<AppState>,
    Path((app_id, group_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<AppFilterParams>,
) -> Result<Json<IssueEventsResponse>> {
    issue_events(state, IssueKind::Anr, app_id, group_id, params, Utc::now()).await
}
