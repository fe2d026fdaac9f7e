use actix_web::{http::StatusCode, test, web, App};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use civic_report_service::db::MemoryStore;
use civic_report_service::handlers::{self, AppState};
use civic_report_service::metrics;
use civic_report_service::services::{
    LifecyclePolicy, MemoryEvidenceStore, NotificationInbox, NotificationRelay, RelaySettings,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

struct Fixture {
    state: web::Data<AppState>,
    store: Arc<MemoryStore>,
    inbox: Arc<NotificationInbox>,
    staff_id: Uuid,
}

async fn fixture() -> Fixture {
    let staff_id = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new().with_staff([staff_id]).await);
    let inbox = Arc::new(NotificationInbox::new(store.clone()));
    let state = AppState::new(
        store.clone(),
        Arc::new(MemoryEvidenceStore::new()),
        inbox.clone(),
        LifecyclePolicy::default(),
    );
    Fixture {
        state: web::Data::new(state),
        store,
        inbox,
        staff_id,
    }
}

fn as_user(req: test::TestRequest, id: Uuid, role: &str) -> test::TestRequest {
    req.insert_header(("X-User-Id", id.to_string()))
        .insert_header(("X-User-Role", role.to_string()))
}

fn photo() -> String {
    STANDARD.encode([0xFFu8, 0xD8, 0xFF, 0xE0])
}

#[actix_rt::test]
async fn test_full_flow_over_http() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let citizen = Uuid::new_v4();
    let admin = Uuid::new_v4();

    let req = as_user(test::TestRequest::post().uri("/api/v1/reports"), citizen, "CITIZEN")
        .set_json(json!({
            "title": "Broken streetlight",
            "category": "Street Lighting",
            "location": "12th Main",
            "latitude": 12.9716,
            "longitude": 77.5946,
            "photo": format!("data:image/png;base64,{}", photo()),
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["status"], "OPEN");
    assert_eq!(report["category"], "street_lighting");
    let id = report["id"].as_str().unwrap().to_string();

    let req = as_user(
        test::TestRequest::put().uri(&format!("/api/v1/reports/{}/assign", id)),
        admin,
        "ADMIN",
    )
    .set_json(json!({ "staff_id": f.staff_id }))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // No photo
    let req = as_user(
        test::TestRequest::put().uri(&format!("/api/v1/reports/{}/resolve", id)),
        f.staff_id,
        "STAFF",
    )
    .set_json(json!({ "latitude": 12.9716, "longitude": 77.5950 }))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "MISSING_EVIDENCE");

    // Roughly 1.1 km away
    let req = as_user(
        test::TestRequest::put().uri(&format!("/api/v1/reports/{}/resolve", id)),
        f.staff_id,
        "STAFF",
    )
    .set_json(json!({ "photo": photo(), "latitude": 12.9816, "longitude": 77.5946 }))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "GEOFENCE_VIOLATION");
    assert_eq!(body["limit_meters"], 200.0);
    assert!(body["distance_meters"].as_f64().unwrap() > 1000.0);

    let req = as_user(
        test::TestRequest::put().uri(&format!("/api/v1/reports/{}/resolve", id)),
        f.staff_id,
        "STAFF",
    )
    .set_json(json!({ "photo": photo(), "latitude": 12.9716, "longitude": 77.5950 }))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = as_user(
        test::TestRequest::put().uri(&format!("/api/v1/reports/{}/verify", id)),
        citizen,
        "CITIZEN",
    )
    .set_json(json!({ "latitude": 12.9717, "longitude": 77.5947 }))
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["status"], "CLOSED");

    let req = as_user(
        test::TestRequest::get().uri("/api/v1/rewards/balance"),
        citizen,
        "CITIZEN",
    )
    .to_request();
    let balance: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(balance["balance"], 75);

    let req = as_user(
        test::TestRequest::get().uri(&format!("/api/v1/reports/{}/updates", id)),
        citizen,
        "CITIZEN",
    )
    .to_request();
    let updates: Value = test::call_and_read_body_json(&app, req).await;
    let statuses: Vec<&str> = updates
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["CLOSED", "RESOLVED", "IN_PROGRESS", "OPEN"]);

    let req = as_user(
        test::TestRequest::get().uri(&format!("/api/v1/staff/{}/tasks", f.staff_id)),
        f.staff_id,
        "STAFF",
    )
    .to_request();
    let tasks: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);
}

#[actix_rt::test]
async fn test_missing_identity_is_unauthorized() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .set_json(json!({ "title": "x", "category": "roads", "location": "y" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn test_wrong_role_is_forbidden() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let req = as_user(test::TestRequest::post().uri("/api/v1/reports"), f.staff_id, "STAFF")
        .set_json(json!({ "title": "Leak", "category": "water_leakage", "location": "Main Rd" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "WRONG_ACTOR");
}

#[actix_rt::test]
async fn test_status_filter_accepts_synonyms() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let citizen = Uuid::new_v4();
    for title in ["Pothole", "Garbage pile"] {
        let req = as_user(test::TestRequest::post().uri("/api/v1/reports"), citizen, "USER")
            .set_json(json!({ "title": title, "category": "roads", "location": "Ring Rd" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    let req = as_user(
        test::TestRequest::get().uri("/api/v1/reports?status=Pending"),
        citizen,
        "CITIZEN",
    )
    .to_request();
    let open: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(open.as_array().unwrap().len(), 2);

    let req = as_user(
        test::TestRequest::get().uri("/api/v1/reports?status=Solved"),
        citizen,
        "CITIZEN",
    )
    .to_request();
    let solved: Value = test::call_and_read_body_json(&app, req).await;
    assert!(solved.as_array().unwrap().is_empty());

    let req = as_user(
        test::TestRequest::get().uri("/api/v1/reports?status=rejected"),
        citizen,
        "CITIZEN",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );

    let req = as_user(
        test::TestRequest::get().uri(&format!("/api/v1/users/{}/reports", citizen)),
        citizen,
        "CITIZEN",
    )
    .to_request();
    let mine: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(mine.as_array().unwrap().len(), 2);

    let req = as_user(
        test::TestRequest::get().uri(&format!("/api/v1/reports/{}", Uuid::new_v4())),
        citizen,
        "CITIZEN",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_rt::test]
async fn test_notifications_and_redemption() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let citizen = Uuid::new_v4();
    let req = as_user(test::TestRequest::post().uri("/api/v1/reports"), citizen, "CITIZEN")
        .set_json(json!({ "title": "Fallen tree", "category": "public_parks", "location": "Lalbagh" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let relay = NotificationRelay::new(f.store.clone(), f.inbox.clone(), RelaySettings::default());
    assert_eq!(relay.run_once().await.unwrap(), 1);

    let req = as_user(test::TestRequest::get().uri("/api/v1/notifications"), citizen, "CITIZEN")
        .to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list["unread_count"], 1);
    let notification_id = list["notifications"][0]["id"].as_str().unwrap().to_string();
    assert!(list["notifications"][0]["message"]
        .as_str()
        .unwrap()
        .contains("Fallen tree"));

    // Someone else cannot acknowledge it
    let req = as_user(
        test::TestRequest::put().uri(&format!("/api/v1/notifications/{}/read", notification_id)),
        Uuid::new_v4(),
        "CITIZEN",
    )
    .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    for _ in 0..2 {
        let req = as_user(
            test::TestRequest::put()
                .uri(&format!("/api/v1/notifications/{}/read", notification_id)),
            citizen,
            "CITIZEN",
        )
        .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
    assert_eq!(f.inbox.unread_count(citizen).await.unwrap(), 0);

    let req = as_user(test::TestRequest::post().uri("/api/v1/rewards/redeem"), citizen, "CITIZEN")
        .set_json(json!({ "cost": 10, "item": "Tree sapling" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "INSUFFICIENT_BALANCE");

    let req = as_user(test::TestRequest::post().uri("/api/v1/rewards/redeem"), citizen, "CITIZEN")
        .set_json(json!({ "cost": 0, "item": "Tree sapling" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[actix_rt::test]
async fn test_phone_sized_photos_fit_and_oversized_get_error_body() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;
    let citizen = Uuid::new_v4();
    let submit = |bytes: usize| {
        as_user(test::TestRequest::post().uri("/api/v1/reports"), citizen, "CITIZEN")
            .set_json(json!({
                "title": "Collapsed drain cover",
                "category": "roads",
                "location": "Church St",
                "photo": STANDARD.encode(vec![0xABu8; bytes]),
                "photo_content_type": "image/jpeg",
            }))
            .to_request()
    };

    // Larger than actix's default JSON limit, well under the evidence cap
    let resp = test::call_service(&app, submit(3 * 1024 * 1024)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Fits the body limit but not the evidence cap
    let resp = test::call_service(&app, submit(10 * 1024 * 1024 + 1)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "INVALID_INPUT");

    // Rejected by the body limit itself
    let resp = test::call_service(&app, submit(12 * 1024 * 1024)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "INVALID_INPUT");
    assert!(body["message"].as_str().unwrap().contains("bytes"));

    let req = as_user(test::TestRequest::get().uri("/api/v1/reports"), citizen, "CITIZEN")
        .to_request();
    let reports: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(reports.as_array().unwrap().len(), 1);
}

#[actix_rt::test]
async fn test_admin_lists_assignable_staff() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let req = as_user(test::TestRequest::get().uri("/api/v1/staff"), Uuid::new_v4(), "ADMIN")
        .to_request();
    let staff: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(staff, json!([f.staff_id]));

    let req = as_user(test::TestRequest::get().uri("/api/v1/staff"), Uuid::new_v4(), "CITIZEN")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_rt::test]
async fn test_reads_require_identity() {
    let f = fixture().await;
    let app = test::init_service(
        App::new()
            .app_data(f.state.clone())
            .app_data(handlers::json_config(LifecyclePolicy::default().max_evidence_bytes))
            .configure(handlers::register_routes),
    )
    .await;

    let id = Uuid::new_v4();
    for uri in [
        "/api/v1/reports".to_string(),
        format!("/api/v1/reports/{}", id),
        format!("/api/v1/reports/{}/updates", id),
        format!("/api/v1/users/{}/reports", id),
        format!("/api/v1/staff/{}/tasks", id),
        "/api/v1/staff".to_string(),
    ] {
        let req = test::TestRequest::get().uri(&uri).to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNAUTHORIZED,
            "{}",
            uri
        );
    }
}

#[actix_rt::test]
async fn test_health_and_metrics() {
    let app = test::init_service(
        App::new()
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(metrics::serve_metrics)),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");

    let req = test::TestRequest::get().uri("/metrics").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}
