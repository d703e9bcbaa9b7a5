/// HTTP-level tests: routing, actor extraction and error mapping.
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rust_urla_api::config::Config;
use rust_urla_api::handlers::{router, AppState};
use rust_urla_api::memory_store::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> (Router, Uuid) {
    let store = MemoryStore::new();
    let employee = store
        .seed_employee("officer@lender.test", "Olive", "Officer")
        .unwrap();
    let state = Arc::new(AppState::new(Arc::new(store), Config::default()));
    (router(state), employee.id)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    actor: Option<(Uuid, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder
            .header("x-actor-id", id.to_string())
            .header("x-actor-role", role);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_actor_is_unauthorized() {
    let (app, _) = app();
    let (status, _) = send(&app, "GET", "/api/v1/applications", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_save_and_read_application() {
    let (app, employee) = app();
    let actor = Some((employee, "employee"));

    let (status, created) = send(
        &app,
        "POST",
        "/api/v1/applications",
        actor,
        Some(json!({"loanPurpose": "Purchase", "loanAmount": 300000})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["currentFormStep"], "borrower-info-1");
    let deal_id = created["dealId"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/applications/{}", deal_id);

    let (status, report) = send(
        &app,
        "PUT",
        &uri,
        actor,
        Some(json!({
            "borrower": {"firstName": "Ann", "lastName": "Lee", "phone": "5551234567"},
            "nextStep": "borrower-info-2"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["step"], "borrower-info-1");
    assert_eq!(report["wroteData"], true);

    let (status, view) = send(&app, "GET", &uri, actor, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["borrower"]["firstName"], "Ann");
    assert_eq!(view["currentFormStep"], "borrower-info-2");
    assert_eq!(view["borrower"]["isVeteran"], false);

    let (status, listing) = send(&app, "GET", "/api/v1/applications", actor, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_progress_routes() {
    let (app, employee) = app();
    let actor = Some((employee, "employee"));
    let (_, created) = send(
        &app,
        "POST",
        "/api/v1/applications",
        actor,
        Some(json!({"loanPurpose": "Refinance", "loanAmount": "150000"})),
    )
    .await;
    let deal_id = created["dealId"].as_str().unwrap().to_string();

    let (status, progress) = send(
        &app,
        "PUT",
        &format!("/api/v1/applications/{}/progress/section", deal_id),
        actor,
        Some(json!({"section": "section1a", "complete": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["completedSections"], 1);
    assert_eq!(progress["nextIncompleteSection"], "Section1b_CurrentEmployment");

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/v1/applications/{}/progress/section", deal_id),
        actor,
        Some(json!({"section": "nope", "complete": true})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, progress) = send(
        &app,
        "GET",
        &format!("/api/v1/applications/{}/progress", deal_id),
        actor,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["totalSections"], 22);
}

#[tokio::test]
async fn test_unknown_application_is_not_found() {
    let (app, employee) = app();
    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v1/applications/{}", Uuid::new_v4()),
        Some((employee, "employee")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_duplicate_registration_points_to_login() {
    let (app, _) = app();
    let registration = json!({
        "firstName": "Reg",
        "lastName": "Istrant",
        "email": "reg@example.com",
        "phone": "5554441212",
        "loanPurpose": "Purchase",
        "purchasePrice": 250000,
        "downPayment": 50000
    });

    let (status, created) = send(
        &app,
        "POST",
        "/api/v1/registrations",
        None,
        Some(registration.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["currentFormStep"], "borrower-info-2");

    let (status, body) =
        send(&app, "POST", "/api/v1/registrations", None, Some(registration)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["action"], "login");
    assert_eq!(body["field"], "email");
}
