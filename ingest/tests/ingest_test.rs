mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use common::{
    crash, event, insert_app, MockSymbolicator, Part, TestHarness, RETRY_AFTER_SECS,
};
use common_types::event::{ScreenView, SessionStart};
use common_types::{Attachment, EventPayload};

async fn ledger_row(db: &PgPool, request_id: Uuid, app_id: Uuid) -> Option<(String, i32, i32)> {
    sqlx::query_as(
        "SELECT status::text, event_count, session_count FROM event_reqs WHERE id = $1 AND app_id = $2",
    )
    .bind(request_id)
    .bind(app_id)
    .fetch_optional(db)
    .await
    .unwrap()
}

async fn group_count(db: &PgPool, table: &str, app_id: Uuid) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE app_id = $1"))
        .bind(app_id)
        .fetch_one(db)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "../migrations")]
async fn test_accepts_batch(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();
    let session = Uuid::now_v7();

    let parts = vec![
        Part::Event(event(session, EventPayload::SessionStart(SessionStart {}))),
        Part::Event(event(
            session,
            EventPayload::ScreenView(ScreenView {
                name: "home".to_string(),
            }),
        )),
        Part::Event(event(Uuid::now_v7(), crash("java.lang.IllegalStateException", "onClick"))),
    ];

    let response = harness.put_events(app_id, request_id, &parts).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = TestHarness::body_json(response).await;
    assert_eq!(body, json!({ "ok": "accepted" }));

    let written = harness.writer.written();
    assert_eq!(written.len(), 3);
    assert!(written.iter().all(|e| e.app_id == app_id));
    assert!(written.iter().all(|e| e.inet_country_code == "in"));
    assert_eq!(written[2].exception().unwrap().fingerprint.len(), 64);

    assert_eq!(
        ledger_row(&db, request_id, app_id).await,
        Some(("done".to_string(), 3, 2))
    );
    assert_eq!(group_count(&db, "exception_groups", app_id).await, 1);

    let (onboarded, unique_identifier): (bool, Option<String>) =
        sqlx::query_as("SELECT onboarded, unique_identifier FROM apps WHERE id = $1")
            .bind(app_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert!(onboarded);
    assert_eq!(unique_identifier.as_deref(), Some("sh.measure.sample"));
}

#[sqlx::test(migrations = "../migrations")]
async fn test_replayed_request_is_accepted_once(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();
    let parts = vec![Part::Event(event(
        Uuid::now_v7(),
        crash("java.lang.IllegalStateException", "onClick"),
    ))];

    let response = harness.put_events(app_id, request_id, &parts).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = harness.put_events(app_id, request_id, &parts).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = TestHarness::body_json(response).await;
    assert_eq!(body, json!({ "ok": "accepted, known event request" }));

    assert_eq!(harness.writer.written().len(), 1);
    assert_eq!(group_count(&db, "exception_groups", app_id).await, 1);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_in_flight_request_is_rate_limited(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();

    sqlx::query("INSERT INTO event_reqs (id, app_id, status) VALUES ($1, $2, 'pending')")
        .bind(request_id)
        .bind(app_id)
        .execute(&db)
        .await
        .unwrap();

    let parts = vec![Part::Event(event(
        Uuid::now_v7(),
        EventPayload::SessionStart(SessionStart {}),
    ))];
    let response = harness.put_events(app_id, request_id, &parts).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap(),
        &RETRY_AFTER_SECS.to_string()
    );
    assert!(harness.writer.written().is_empty());
    // the other attempt still owns the row
    assert_eq!(
        ledger_row(&db, request_id, app_id).await,
        Some(("pending".to_string(), 0, 0))
    );
}

#[sqlx::test(migrations = "../migrations")]
async fn test_request_finished_by_another_attempt_is_known(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();

    // the other attempt committed after this one was sent
    sqlx::query(
        "INSERT INTO event_reqs (id, app_id, status, event_count, session_count) VALUES ($1, $2, 'done', 1, 1)",
    )
    .bind(request_id)
    .bind(app_id)
    .execute(&db)
    .await
    .unwrap();

    let parts = vec![Part::Event(event(
        Uuid::now_v7(),
        EventPayload::SessionStart(SessionStart {}),
    ))];
    let response = harness.put_events(app_id, request_id, &parts).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = TestHarness::body_json(response).await;
    assert_eq!(body, json!({ "ok": "accepted, known event request" }));
    assert!(harness.writer.written().is_empty());
    assert_eq!(
        ledger_row(&db, request_id, app_id).await,
        Some(("done".to_string(), 1, 1))
    );
}

#[sqlx::test(migrations = "../migrations")]
async fn test_invalid_batch_releases_ledger_row(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();

    let mut bad = event(Uuid::now_v7(), EventPayload::SessionStart(SessionStart {}));
    bad.attribute.os_name = "windows".to_string();

    let response = harness
        .put_events(app_id, request_id, &[Part::Event(bad)])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = TestHarness::body_json(response).await;
    assert_eq!(body["error"], "failed to validate events");

    assert_eq!(ledger_row(&db, request_id, app_id).await, None);

    // a corrected retry goes through
    let good = event(Uuid::now_v7(), EventPayload::SessionStart(SessionStart {}));
    let response = harness
        .put_events(app_id, request_id, &[Part::Event(good)])
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_rejects_unusable_requests(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;

    let response = harness
        .put_events(Uuid::now_v7(), Uuid::now_v7(), &[Part::Raw("event".to_string(), b"{}".to_vec())])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = TestHarness::body_json(response).await;
    assert_eq!(body["error"], "app not found");

    let response = harness
        .send(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/apps/{app_id}/events"))
                .header(header::CONTENT_TYPE, "multipart/form-data; boundary=x")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .put_events(app_id, Uuid::now_v7(), &[Part::Raw("event".to_string(), b"not json".to_vec())])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness.put_events(app_id, Uuid::now_v7(), &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_oversized_batch(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();

    let blob_id = Uuid::now_v7();
    let mut with_attachment = event(Uuid::now_v7(), crash("java.lang.Error", "run"));
    with_attachment.attachments.push(Attachment {
        id: blob_id,
        name: "screenshot.png".to_string(),
        kind: "screenshot".to_string(),
        ..Default::default()
    });

    let response = harness
        .put_events(
            app_id,
            request_id,
            &[
                Part::Event(with_attachment),
                Part::Blob {
                    id: blob_id,
                    file_name: "screenshot.png".to_string(),
                    data: vec![0u8; common::MAX_BATCH_SIZE_BYTES],
                },
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = TestHarness::body_json(response).await;
    assert_eq!(body["error"], "payload too large");
    assert_eq!(ledger_row(&db, request_id, app_id).await, None);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_uploads_attachments(db: PgPool) {
    let harness = TestHarness::new(db.clone());
    let app_id = insert_app(&db).await;
    let blob_id = Uuid::now_v7();

    let mut with_attachment = event(Uuid::now_v7(), crash("java.lang.Error", "run"));
    with_attachment.attachments.push(Attachment {
        id: blob_id,
        name: "screenshot.png".to_string(),
        kind: "screenshot".to_string(),
        ..Default::default()
    });

    let response = harness
        .put_events(
            app_id,
            Uuid::now_v7(),
            &[
                Part::Event(with_attachment),
                Part::Blob {
                    id: blob_id,
                    file_name: "screenshot.png".to_string(),
                    data: b"png".to_vec(),
                },
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let key = format!("{blob_id}.png");
    assert_eq!(harness.attachments.keys(), vec![key.clone()]);

    let written = harness.writer.written();
    let attachment = &written[0].attachments[0];
    assert_eq!(attachment.key, key);
    assert_eq!(attachment.location, format!("http://minio:9000/attachments/{key}"));
}

#[sqlx::test(migrations = "../migrations")]
async fn test_symbolicates_before_fingerprinting(db: PgPool) {
    let symbolicator = MockSymbolicator::new("sh.measure.MainActivity");
    let harness = TestHarness::with_symbolicator(db.clone(), symbolicator.clone());
    let app_id = insert_app(&db).await;
    let request_id = Uuid::now_v7();

    let parts: Vec<Part> = ["onClick", "onResume", "onPause"]
        .iter()
        .map(|method| Part::Event(event(Uuid::now_v7(), crash("java.lang.Error", method))))
        .collect();

    let response = harness.put_events(app_id, request_id, &parts).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // three candidates in batches of two
    assert_eq!(symbolicator.calls(), 2);

    let written = harness.writer.written();
    for event in &written {
        let exception = event.exception().unwrap();
        assert_eq!(exception.exceptions[0].frames[0].class_name, "sh.measure.MainActivity");
        assert!(!exception.fingerprint.is_empty());
    }

    let attempts: i32 = sqlx::query_scalar(
        "SELECT symbolication_attempts_count FROM event_reqs WHERE id = $1 AND app_id = $2",
    )
    .bind(request_id)
    .bind(app_id)
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(attempts, 1);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_early_exit_bucketing(db: PgPool) {
    let harness = TestHarness::stopping_after_first_new_group(db.clone());
    let app_id = insert_app(&db).await;

    let parts = vec![
        Part::Event(event(Uuid::now_v7(), crash("java.lang.Error", "onClick"))),
        Part::Event(event(Uuid::now_v7(), crash("java.lang.Error", "onResume"))),
    ];
    let response = harness.put_events(app_id, Uuid::now_v7(), &parts).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert_eq!(group_count(&db, "exception_groups", app_id).await, 1);
    // events are still written in full
    assert_eq!(harness.writer.written().len(), 2);
}

#[sqlx::test(migrations = "../migrations")]
async fn test_health_routes(db: PgPool) {
    let harness = TestHarness::new(db);

    for uri in ["/_liveness", "/_readiness"] {
        let response = harness
            .send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
