use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct App {
    pub id: Uuid,
    pub app_name: String,
    pub onboarded: bool,
}

pub async fn find_app(pool: &PgPool, app_id: Uuid) -> Result<Option<App>, sqlx::Error> {
    sqlx::query_as::<_, App>(
        r#"
SELECT id, app_name, onboarded FROM apps WHERE id = $1
        "#,
    )
    .bind(app_id)
    .fetch_optional(pool)
    .await
}

/// First ingest for an app records its identity. No-op once onboarded.
pub async fn onboard(
    conn: &mut PgConnection,
    app_id: Uuid,
    unique_identifier: &str,
    os_name: &str,
    first_version: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
UPDATE apps
SET
    onboarded = true,
    unique_identifier = $2,
    os_name = $3,
    first_version = $4,
    onboarded_at = NOW(),
    updated_at = NOW()
WHERE id = $1 AND onboarded = false
        "#,
    )
    .bind(app_id)
    .bind(unique_identifier)
    .bind(os_name)
    .bind(first_version)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}
