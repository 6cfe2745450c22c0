use common_types::{IssueGroup, IssueKind};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const GROUP_COLUMNS: &str = "id, app_id, fingerprint, type, message, method_name, file_name, \
                             line_number, first_seen, last_seen, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct App {
    pub id: Uuid,
    pub os_name: Option<String>,
    pub onboarded: bool,
}

pub async fn find_app(pool: &PgPool, app_id: Uuid) -> Result<Option<App>, sqlx::Error> {
    sqlx::query_as::<_, App>("SELECT id, os_name, onboarded FROM apps WHERE id = $1")
        .bind(app_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_group(
    pool: &PgPool,
    kind: IssueKind,
    app_id: Uuid,
    group_id: Uuid,
) -> Result<Option<IssueGroup>, sqlx::Error> {
    let sql = format!(
        "SELECT {GROUP_COLUMNS} FROM {} WHERE app_id = $1 AND id = $2",
        kind.table()
    );
    sqlx::query_as::<_, IssueGroup>(&sql)
        .bind(app_id)
        .bind(group_id)
        .fetch_optional(pool)
        .await
}

pub async fn groups_by_fingerprint(
    pool: &PgPool,
    kind: IssueKind,
    app_id: Uuid,
    fingerprints: &[String],
) -> Result<Vec<IssueGroup>, sqlx::Error> {
    if fingerprints.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {GROUP_COLUMNS} FROM {} WHERE app_id = $1 AND fingerprint = ANY($2)",
        kind.table()
    );
    sqlx::query_as::<_, IssueGroup>(&sql)
        .bind(app_id)
        .bind(fingerprints)
        .fetch_all(pool)
        .await
}

/// Build sizes reported for an app, in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildSizes {
    pub average: f64,
    pub selected: f64,
}

/// Average over every reported build and the size of the selected one.
/// `None` when the selected build never reported a size.
pub async fn build_sizes(
    pool: &PgPool,
    app_id: Uuid,
    version_name: &str,
    version_code: &str,
) -> Result<Option<BuildSizes>, sqlx::Error> {
    let selected: Option<f64> = sqlx::query_scalar(
        "SELECT AVG(build_size)::float8 FROM build_sizes \
         WHERE app_id = $1 AND version_name = $2 AND version_code = $3 \
         HAVING COUNT(*) > 0",
    )
    .bind(app_id)
    .bind(version_name)
    .bind(version_code)
    .fetch_optional(pool)
    .await?;

    let Some(selected) = selected else {
        return Ok(None);
    };

    let average: f64 = sqlx::query_scalar(
        "SELECT COALESCE(AVG(build_size), 0)::float8 FROM build_sizes WHERE app_id = $1",
    )
    .bind(app_id)
    .fetch_one(pool)
    .await?;

    Ok(Some(BuildSizes { average, selected }))
}
