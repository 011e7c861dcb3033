use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use tourdesk_core::config::WorkflowSettings;
use tourdesk_core::domain::user::Role;
use tourdesk_core::identity::{Actor, CredentialService};
use tourdesk_core::services::NewUser;
use tourdesk_core::Backoffice;
use tourdesk_db::InMemoryStore;

use super::{router, AppState};
use crate::rendering::TemplateRenderer;
use crate::storage::DiskBlobStore;

const PASSWORD: &str = "correct-horse-battery";

struct TestApp {
    app: Router,
    backoffice: Backoffice,
    _uploads: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        let credentials = CredentialService::new(SecretString::from("route-secret".to_owned()), 30);
        let backoffice =
            Backoffice::new(Arc::new(InMemoryStore::new()), credentials, WorkflowSettings::default());
        let uploads = tempfile::tempdir().expect("tempdir");
        let state = AppState {
            backoffice: backoffice.clone(),
            renderer: Arc::new(TemplateRenderer::embedded()),
            blobs: Arc::new(DiskBlobStore::new(uploads.path(), 1024 * 1024)),
            max_upload_bytes: 1024 * 1024,
        };
        Self { app: router(state), backoffice, _uploads: uploads }
    }

    async fn staff(&self, email: &str, role: Role) -> String {
        self.backoffice
            .create_user(
                &Actor::system(),
                NewUser {
                    email: email.to_owned(),
                    name: format!("{role} user"),
                    phone: None,
                    role,
                    password: PASSWORD.to_owned(),
                    can_see_cost_breakup: false,
                },
            )
            .await
            .expect("create staff");
        self.backoffice.issue_credential_for(email).await.expect("credential").token
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
        (status, value)
    }
}

fn trip_body() -> Value {
    let start = Utc::now().date_naive() + Duration::days(40);
    json!({
        "title": "Andaman dive week",
        "trip": {
            "destination": "Havelock Island",
            "start_date": start,
            "end_date": start + Duration::days(6),
            "people_count": 2,
            "budget_max": "90000",
            "services": { "holiday_package": true }
        }
    })
}

fn quotation_body() -> Value {
    json!({
        "data": {
            "trip_title": "Andaman dive week",
            "itinerary": [
                { "day": 1, "title": "Arrive Port Blair", "activities": ["Cellular Jail"], "hotel": "Sea Shell" }
            ],
            "pricing": {
                "subtotal": "80000",
                "taxes": "0",
                "discount": "0",
                "total": "80000",
                "per_person": "40000",
                "deposit_due": "0",
                "currency": "INR"
            },
            "inclusions": ["Ferry transfers"]
        }
    })
}

async fn customer_token(app: &TestApp) -> String {
    let (status, _) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "diver@example.test",
                "name": "Dev Diver",
                "password": PASSWORD
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, login) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "diver@example.test", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    login["credential"]["token"].as_str().expect("token").to_owned()
}

#[tokio::test]
async fn registered_customer_can_sign_in_and_read_profile() {
    let app = TestApp::new();
    let token = customer_token(&app).await;

    let (status, profile) = app.send(Method::GET, "/api/auth/me", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "diver@example.test");
    assert_eq!(profile["role"], "customer");
}

#[tokio::test]
async fn missing_or_garbled_credentials_are_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.send(Method::GET, "/api/requests", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthenticated");
    assert!(!body["error"]["correlation_id"].as_str().unwrap_or_default().is_empty());

    let (status, _) = app.send(Method::GET, "/api/requests", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = TestApp::new();
    customer_token(&app).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "diver@example.test", "password": "nope-nope-nope" })),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthenticated");
}

#[tokio::test]
async fn customers_cannot_manage_users() {
    let app = TestApp::new();
    let token = customer_token(&app).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/users",
            Some(&token),
            Some(json!({
                "email": "mole@example.test",
                "name": "Mole",
                "role": "admin",
                "password": PASSWORD
            })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let app = TestApp::new();
    let sales = app.staff("sales@agency.test", Role::Sales).await;

    let (status, body) = app.send(Method::GET, "/api/requests/missing", Some(&sales), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn second_salesperson_claim_is_a_conflict() {
    let app = TestApp::new();
    let customer = customer_token(&app).await;
    let first = app.staff("first@agency.test", Role::Sales).await;
    let second = app.staff("second@agency.test", Role::Sales).await;

    let (status, request) = app.send(Method::POST, "/api/requests", Some(&customer), Some(trip_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "PENDING");
    let id = request["id"].as_str().expect("id").to_owned();

    let (status, _) = app.send(Method::POST, &format!("/api/requests/{id}/assign"), Some(&first), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        app.send(Method::POST, &format!("/api/requests/{id}/assign"), Some(&second), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn customer_edits_own_request_but_not_a_strangers() {
    let app = TestApp::new();
    let customer = customer_token(&app).await;
    let sales = app.staff("sales@agency.test", Role::Sales).await;
    let outsider = app.staff("outsider@agency.test", Role::Sales).await;

    let (_, request) = app.send(Method::POST, "/api/requests", Some(&customer), Some(trip_body())).await;
    let id = request["id"].as_str().expect("id").to_owned();
    app.send(Method::POST, &format!("/api/requests/{id}/assign"), Some(&sales), None).await;

    let (status, updated) = app
        .send(
            Method::PUT,
            &format!("/api/requests/{id}"),
            Some(&customer),
            Some(json!({ "title": "Andaman dive fortnight" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Andaman dive fortnight");
    assert_eq!(updated["status"], "PENDING");

    let (status, body) = app
        .send(Method::PUT, &format!("/api/requests/{id}"), Some(&outsider), Some(json!({ "title": "Mine now" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (_, timeline) = app.send(Method::GET, &format!("/api/requests/{id}/timeline"), Some(&sales), None).await;
    let actions: Vec<&str> =
        timeline.as_array().expect("timeline").iter().filter_map(|entry| entry["action"].as_str()).collect();
    assert!(actions.contains(&"request_updated"));
}

#[tokio::test]
async fn quotation_to_invoice_flow_over_http() {
    let app = TestApp::new();
    let customer = customer_token(&app).await;
    let sales = app.staff("sales@agency.test", Role::Sales).await;
    let ops = app.staff("ops@agency.test", Role::Operations).await;

    let (_, request) = app.send(Method::POST, "/api/requests", Some(&customer), Some(trip_body())).await;
    let request_id = request["id"].as_str().expect("id").to_owned();

    for (token, step) in [(&sales, "assign"), (&sales, "validate"), (&ops, "assign")] {
        let (status, _) =
            app.send(Method::POST, &format!("/api/requests/{request_id}/{step}"), Some(token), None).await;
        assert_eq!(status, StatusCode::OK, "{step} should succeed");
    }

    let (status, quotation) = app
        .send(
            Method::POST,
            &format!("/api/requests/{request_id}/quotations"),
            Some(&sales),
            Some(quotation_body()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let quotation_id = quotation["id"].as_str().expect("id").to_owned();

    let (status, _) =
        app.send(Method::GET, &format!("/api/quotations/{quotation_id}"), Some(&customer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "drafts stay hidden from the customer");

    let expires_at = Utc::now() + Duration::days(7);
    let (status, published) = app
        .send(
            Method::POST,
            &format!("/api/quotations/{quotation_id}/publish"),
            Some(&ops),
            Some(json!({ "expires_at": expires_at })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["status"], "SENT");

    let (status, outcome) =
        app.send(Method::POST, &format!("/api/quotations/{quotation_id}/accept"), Some(&customer), None).await;
    assert_eq!(status, StatusCode::OK);
    let invoice_id = outcome["invoice"]["id"].as_str().expect("invoice raised").to_owned();

    let (status, _) =
        app.send(Method::POST, &format!("/api/quotations/{quotation_id}/accept"), Some(&customer), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, payment) = app
        .send(
            Method::POST,
            &format!("/api/invoices/{invoice_id}/payments"),
            Some(&customer),
            Some(json!({ "amount": "30000", "method": "upi" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "PENDING");
    let payment_id = payment["id"].as_str().expect("payment id").to_owned();

    let upload = Request::builder()
        .method(Method::PUT)
        .uri(format!("/api/payments/{payment_id}/proof?file_name=upi-receipt.png"))
        .header(header::AUTHORIZATION, format!("Bearer {customer}"))
        .body(Body::from(vec![0x89, b'P', b'N', b'G']))
        .expect("request");
    let response = app.app.clone().oneshot(upload).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let updated: Value = serde_json::from_slice(&bytes).expect("json");
    assert!(updated["proof_reference"].as_str().expect("reference").ends_with(".png"));

    let document = Request::builder()
        .uri(format!("/api/invoices/{invoice_id}/document"))
        .header(header::AUTHORIZATION, format!("Bearer {customer}"))
        .body(Body::empty())
        .expect("request");
    let response = app.app.clone().oneshot(document).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        Some("text/html; charset=utf-8")
    );
}
