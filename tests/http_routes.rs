/// Router-level tests: request decoding, status codes and JSON bodies.
mod common;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use common::{basic_client, RecordingNotifier};
use loan_orchestrator::disbursement_models::RawDisbursement;
use loan_orchestrator::errors::AppError;
use loan_orchestrator::handlers::{self, api_routes, AppState};
use loan_orchestrator::monitor::{
    DisbursementAnalyzer, EmailItem, EmailSource, UnconfiguredAnalyzer, UnconfiguredEmailSource,
};
use loan_orchestrator::store::StoreRouter;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct QuietInbox;

#[async_trait]
impl EmailSource for QuietInbox {
    async fn connect(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn fetch_since(
        &self,
        _folder: &str,
        _since: DateTime<Utc>,
        _max_items: usize,
    ) -> Result<Vec<EmailItem>, AppError> {
        Ok(vec![EmailItem {
            message_id: Some("<m-1@bank.example>".into()),
            subject: "Disbursement advice".into(),
            sender: "ops@bank.example".into(),
            date: Some(Utc::now().to_rfc2822()),
            body: String::new(),
        }])
    }
}

struct SingleRecord;

#[async_trait]
impl DisbursementAnalyzer for SingleRecord {
    async fn analyze(&self, item: &EmailItem) -> Result<Vec<RawDisbursement>, AppError> {
        let raw: RawDisbursement = serde_json::from_value(json!({
            "loanAccountNumber": "LAN-42",
            "basicDisbId": item.message_id,
            "disbursementAmount": "₹ 12,50,000",
            "firstName": "Kiran",
            "appBankName": "HDFC"
        }))
        .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(vec![raw])
    }
}

fn app_with(source: Arc<dyn EmailSource>, analyzer: Arc<dyn DisbursementAnalyzer>) -> Router {
    let state = AppState::new(
        basic_client("http://127.0.0.1:9"),
        StoreRouter::in_memory(),
        Arc::new(RecordingNotifier::default()),
        chrono::Duration::minutes(5),
        source,
        analyzer,
    );
    Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes())
        .with_state(Arc::new(state))
}

fn app() -> Router {
    app_with(Arc::new(QuietInbox), Arc::new(SingleRecord))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_configured_environments() {
    let (status, body) = call(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environments"]["orbit"], true);
    assert_eq!(body["environments"]["homfinity"], true);
}

#[tokio::test]
async fn create_lead_validation_is_unprocessable() {
    let (status, body) = call(
        &app(),
        "POST",
        "/create_lead",
        Some(json!({ "environment": "mars", "firstName": "Asha" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("orbit"));
}

#[tokio::test]
async fn lead_status_needs_an_identifier() {
    let (status, _) = call(&app(), "POST", "/lead_status", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn otp_round_trip_over_http() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/otp_send",
        Some(json!({ "phone_number": "9876543210" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = call(
        &app,
        "POST",
        "/otp_verify",
        Some(json!({ "phone_number": "9123456780", "otp": "123456" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn monitor_lifecycle_over_http() {
    let app = app();

    let (status, _) = call(&app, "POST", "/live_disbursements_stop", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/disbursements/manual-check", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/live_disbursements_start",
        Some(json!({ "polling_interval": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let config = json!({ "polling_interval": 3600, "email_folders": ["INBOX"] });
    let (status, body) = call(&app, "POST", "/live_disbursements_start", Some(config.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = call(&app, "POST", "/live_disbursements_start", Some(config)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "GET", "/live_disbursements_status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], true);

    // The worker's first cycle and the manual check share one seen-set, so the
    // email is ingested exactly once whichever runs first.
    let (status, body) = call(&app, "POST", "/disbursements/manual-check", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let mut session_count = 0;
    for _ in 0..100 {
        let (_, body) = call(&app, "GET", "/disbursements/session", None).await;
        session_count = body["data"]["count"].as_u64().unwrap_or(0);
        if session_count > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(session_count, 1);

    let (status, body) = call(&app, "GET", "/disbursements?bank_name=hdfc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["data"][0]["loan_account_number"], "LAN-42");

    let (status, body) = call(&app, "POST", "/live_disbursements_stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = call(&app, "GET", "/live_disbursements_status", None).await;
    assert_eq!(body["is_running"], false);
}

#[tokio::test]
async fn unconfigured_mailbox_cannot_start() {
    let app = app_with(Arc::new(UnconfiguredEmailSource), Arc::new(UnconfiguredAnalyzer));
    let (status, body) = call(&app, "POST", "/live_disbursements_start", Some(json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn disbursement_paging_is_validated() {
    let (status, _) = call(&app(), "GET", "/disbursements?limit=5000", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app(), "GET", "/disbursements?date_from=05-02-2024", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn stats_include_data_freshness() {
    let (status, body) = call(&app(), "GET", "/disbursements/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["stats"].get("data_freshness").is_some());
}
