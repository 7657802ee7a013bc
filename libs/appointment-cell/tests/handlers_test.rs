use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::models::{PatientOwner, PatientWithOwner};
use appointment_cell::router::appointment_routes;
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::collaborators::{InMemoryPatientDirectory, InMemoryReportIndex};
use appointment_cell::services::store::InMemoryAppointmentStore;
use shared_config::{AppConfig, ConflictPolicy};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    patients: Arc<InMemoryPatientDirectory>,
    config: Arc<AppConfig>,
}

fn test_app(policy: ConflictPolicy) -> TestApp {
    let mut config = TestConfig::default().to_app_config();
    config.conflict_policy = policy;
    let config = Arc::new(config);

    let patients = Arc::new(InMemoryPatientDirectory::new());
    let service = Arc::new(AppointmentBookingService::new(
        Arc::new(InMemoryAppointmentStore::new()),
        patients.clone(),
        Arc::new(InMemoryReportIndex::new()),
    ));

    TestApp {
        router: appointment_routes(Arc::clone(&config), service),
        patients,
        config,
    }
}

impl TestApp {
    fn token_for(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.config.supabase_jwt_secret, Some(1))
    }

    async fn register_patient(&self, organization_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.patients.register(PatientWithOwner {
            id,
            organization_id,
            name: "Milo".to_string(),
            animal_type: Some("Cat".to_string()),
            owner: PatientOwner { name: "Jo Park".to_string(), email: None },
            organization_name: "Harbor Animal Clinic".to_string(),
        }).await;
        id
    }

    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }
}

fn booking_body(patient_id: Uuid, begin_at: &str, end_at: &str) -> Value {
    json!({
        "patient_id": patient_id,
        "begin_at": begin_at,
        "end_at": end_at,
    })
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let app = test_app(ConflictPolicy::Advisory);

    let (status, _) = app.send("GET", "/today", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send("GET", "/today", Some(&JwtTestUtils::create_malformed_token()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_without_organization_is_rejected() {
    let app = test_app(ConflictPolicy::Advisory);
    let token = app.token_for(&TestUser::without_organization("vet@example.com"));

    let (status, body) = app.send("GET", "/today", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_create_and_fetch_appointment() {
    let app = test_app(ConflictPolicy::Advisory);
    let org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));

    let (status, body) = app.send("POST", "/", Some(&token),
        Some(booking_body(patient_id, "2024-01-10T10:00:00Z", "2024-01-10T10:30:00Z"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["status"], "CREATED");
    assert_eq!(body["appointment"]["organization_id"], org.to_string());

    let id = body["appointment"]["id"].as_str().unwrap().to_string();
    let (status, body) = app.send("GET", &format!("/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["begin_at"], "2024-01-10T10:00:00Z");
}

#[tokio::test]
async fn test_invalid_interval_is_bad_request() {
    let app = test_app(ConflictPolicy::Advisory);
    let org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));

    let (status, body) = app.send("POST", "/", Some(&token),
        Some(booking_body(patient_id, "2024-01-10T10:00:00Z", "2024-01-10T10:00:00Z"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_other_organization_cannot_see_or_delete() {
    let app = test_app(ConflictPolicy::Advisory);
    let org = Uuid::new_v4();
    let other_org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let owner_token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));
    let other_token = app.token_for(&TestUser::admin("admin@example.com", &other_org.to_string()));

    let (_, body) = app.send("POST", "/", Some(&owner_token),
        Some(booking_body(patient_id, "2024-01-10T10:00:00Z", "2024-01-10T10:30:00Z"))).await;
    let id = body["appointment"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.send("GET", &format!("/{}", id), Some(&other_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send("PUT", &format!("/{}", id), Some(&other_token),
        Some(json!({ "note": "hijack" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send("DELETE", &format!("/{}", id), Some(&other_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.send("GET", &format!("/{}", id), Some(&owner_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["appointment"]["note"].is_null());
}

#[tokio::test]
async fn test_strict_policy_returns_conflict() {
    let app = test_app(ConflictPolicy::Strict);
    let org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));

    let (status, first) = app.send("POST", "/", Some(&token),
        Some(booking_body(patient_id, "2024-01-10T10:00:00Z", "2024-01-10T10:30:00Z"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.send("POST", "/", Some(&token),
        Some(booking_body(patient_id, "2024-01-10T10:15:00Z", "2024-01-10T10:45:00Z"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
    assert_eq!(body["details"]["conflicting_appointment_ids"][0], first["appointment"]["id"]);

    // A request can opt out of the configured policy
    let mut advisory = booking_body(patient_id, "2024-01-10T10:15:00Z", "2024-01-10T10:45:00Z");
    advisory["strict"] = json!(false);
    let (status, _) = app.send("POST", "/", Some(&token), Some(advisory)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_conflict_check_endpoint() {
    let app = test_app(ConflictPolicy::Advisory);
    let org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));

    let (_, created) = app.send("POST", "/", Some(&token),
        Some(booking_body(patient_id, "2024-01-10T10:00:00Z", "2024-01-10T10:30:00Z"))).await;
    let id = created["appointment"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.send("GET",
        "/conflicts/check?start=2024-01-10T10:15:00Z&end=2024-01-10T11:00:00Z",
        Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_conflict"], true);
    assert_eq!(body["conflicting_appointments"][0]["id"], id);

    let (_, body) = app.send("GET",
        &format!("/conflicts/check?start=2024-01-10T10:15:00Z&end=2024-01-10T11:00:00Z&exclude_appointment_id={}", id),
        Some(&token), None).await;
    assert_eq!(body["has_conflict"], false);

    let (_, body) = app.send("GET",
        "/conflicts/check?start=2024-01-10T10:30:00Z&end=2024-01-10T11:00:00Z",
        Some(&token), None).await;
    assert_eq!(body["has_conflict"], false);
}

#[tokio::test]
async fn test_status_update_and_delete() {
    let app = test_app(ConflictPolicy::Advisory);
    let org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));

    let (_, created) = app.send("POST", "/", Some(&token),
        Some(booking_body(patient_id, "2024-01-10T10:00:00Z", "2024-01-10T10:30:00Z"))).await;
    let id = created["appointment"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.send("PUT", &format!("/{}", id), Some(&token),
        Some(json!({ "status": "COMPLETED" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.send("PUT", &format!("/{}", id), Some(&token),
        Some(json!({ "status": "CONFIRMED" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "CONFIRMED");

    let (status, _) = app.send("DELETE", &format!("/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send("GET", &format!("/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_range_and_patient_listings() {
    let app = test_app(ConflictPolicy::Advisory);
    let org = Uuid::new_v4();
    let patient_id = app.register_patient(org).await;
    let token = app.token_for(&TestUser::practitioner("vet@example.com", &org.to_string()));

    for (begin, end) in [
        ("2024-01-10T15:00:00Z", "2024-01-10T15:30:00Z"),
        ("2024-01-10T09:00:00Z", "2024-01-10T09:30:00Z"),
        ("2024-01-12T09:00:00Z", "2024-01-12T09:30:00Z"),
    ] {
        app.send("POST", "/", Some(&token), Some(booking_body(patient_id, begin, end))).await;
    }

    let (status, body) = app.send("GET",
        "/range?start=2024-01-10T00:00:00Z&end=2024-01-11T00:00:00Z",
        Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["appointments"][0]["begin_at"], "2024-01-10T09:00:00Z");

    let (_, body) = app.send("GET",
        "/calendar?start=2024-01-10T00:00:00Z&end=2024-01-13T00:00:00Z",
        Some(&token), None).await;
    assert_eq!(body["days"].as_array().unwrap().len(), 2);
    assert_eq!(body["days"][1]["date"], "2024-01-12");

    let (_, body) = app.send("GET", &format!("/patients/{}", patient_id), Some(&token), None).await;
    assert_eq!(body["count"], 3);
    assert_eq!(body["appointments"][0]["begin_at"], "2024-01-12T09:00:00Z");

    let (status, body) = app.send("GET", "/without-report", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, _) = app.send("GET", "/without-report?days_back=-5", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
