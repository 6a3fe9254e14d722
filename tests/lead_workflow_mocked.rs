/// Lead workflows against a mocked Basic Application API.
/// Covers the CreateLead -> LeadFlash lifecycle and the persistence rules around it.
mod common;

use common::{basic_client, orbit_lead, BrokenLeadStore, FailingNotifier, RecordingNotifier};
use loan_orchestrator::lead_lifecycle::{LeadLifecycle, LEAD_CREATED_MESSAGE, LEAD_DETAILS_ADDED_MESSAGE};
use loan_orchestrator::memory_store::MemoryStore;
use loan_orchestrator::models::{InternalStatus, LeadFlashRequest, ProcessingStage};
use loan_orchestrator::store::{Backend, LeadStore, StoreRouter};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREATE_PATH: &str = "/api/v1/NewApplication/CreateFBBByBasicUser";
const FULFILL_PATH: &str = "/api/v1/NewApplication/FullfilmentByBasic";
const SELF_FULFILL_PATH: &str = "/api/v1/NewApplication/SelfFullfilment";

fn fbb_success() -> serde_json::Value {
    json!({
        "isError": false,
        "result": {
            "id": "3f1c9a2e-0000-4000-8000-000000000001",
            "basicAppId": "B002BJF",
            "applicationAssignedToRm": "rm-7",
            "applicationComments": [{ "refId": "REF-1" }, { "refId": "REF-2" }]
        }
    })
}

fn self_fulfillment_success() -> serde_json::Value {
    json!({
        "isError": false,
        "result": {
            "id": "3f1c9a2e-0000-4000-8000-000000000001",
            "basicAppId": "B002BJF",
            "applicationStatus": "Login",
            "applicationAssignedToRm": "rm-7",
            "applicationComments": [{ "refId": "REF-9" }]
        }
    })
}

fn flash_request() -> LeadFlashRequest {
    LeadFlashRequest {
        lead: orbit_lead(),
        application_id: Some("3f1c9a2e-0000-4000-8000-000000000001".into()),
        profession_name: Some("Salaried".into()),
        company_name: Some("Acme Pvt Ltd".into()),
        property_value: Some(9_000_000.0),
        ..Default::default()
    }
}

fn lifecycle(server: &MockServer, store: Arc<MemoryStore>) -> (LeadLifecycle, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let stores = StoreRouter::new(Some(Backend::from_memory(store.clone())), Some(Backend::from_memory(store)));
    (
        LeadLifecycle::new(basic_client(&server.uri()), stores, notifier.clone()),
        notifier,
    )
}

#[tokio::test]
async fn create_lead_records_fbb_stage_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .and(header("UserId", "test-user"))
        .and(header_exists("Authorization"))
        .and(header_exists("Nonce"))
        .and(header_exists("CurrentTimestamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, notifier) = lifecycle(&server, store.clone());

    let response = leads.create_lead(orbit_lead()).await.unwrap();
    assert_eq!(response.basic_application_id, "B002BJF");
    assert_eq!(
        response.application_id.as_deref(),
        Some("3f1c9a2e-0000-4000-8000-000000000001")
    );
    assert_eq!(response.reference_id.as_deref(), Some("REF-1"));
    assert_eq!(response.message, LEAD_CREATED_MESSAGE);

    let row = store.find_lead_by_basic_app_id("B002BJF").await.unwrap().unwrap();
    assert_eq!(row.processing_stage, ProcessingStage::Fbb);
    assert_eq!(row.internal_status, InternalStatus::FbbCompleted);
    assert_eq!(row.loan_type.as_deref(), Some("HL"));
    assert_eq!(row.source_endpoint, "create_lead");
    assert!(row.fbb_api_response.is_some());

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "lead_created");
    assert_eq!(sent[0].2, vec!["Asha Verma".to_string(), "B002BJF".to_string()]);
}

#[tokio::test]
async fn repeated_create_updates_the_same_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, _) = lifecycle(&server, store.clone());

    leads.create_lead(orbit_lead()).await.unwrap();
    let mut again = orbit_lead();
    again.city = Some("Bengaluru".into());
    leads.create_lead(again).await.unwrap();

    assert_eq!(store.lead_count().await, 1);
    let row = store.find_lead_by_basic_app_id("B002BJF").await.unwrap().unwrap();
    assert_eq!(row.customer_city.as_deref(), Some("Bengaluru"));
}

#[tokio::test]
async fn unknown_environment_never_reaches_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, _) = lifecycle(&server, store.clone());

    let mut request = orbit_lead();
    request.environment = Some("mars".into());
    let err = leads.create_lead(request).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(store.lead_count().await, 0);
}

#[tokio::test]
async fn upstream_rejection_of_create_is_not_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isError": true,
            "result": null,
            "responseException": {
                "exceptionMessage": "Duplicate application",
                "validationErrors": [{ "name": "pan", "reason": "already used" }]
            }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, notifier) = lifecycle(&server, store.clone());

    let err = leads.create_lead(orbit_lead()).await.unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    assert!(err.to_string().contains("Duplicate application"));
    assert!(err.to_string().contains("pan: already used"));
    assert_eq!(store.lead_count().await, 0);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn upstream_http_error_keeps_its_status_class() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let (leads, _) = lifecycle(&server, Arc::new(MemoryStore::new()));
    let err = leads.create_lead(orbit_lead()).await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failing_store_does_not_fail_create() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .mount(&server)
        .await;

    let memory = Arc::new(MemoryStore::new());
    let backend = Backend {
        leads: Arc::new(BrokenLeadStore),
        disbursements: memory.clone(),
        otps: memory,
    };
    let notifier = Arc::new(RecordingNotifier::default());
    let leads = LeadLifecycle::new(
        basic_client(&server.uri()),
        StoreRouter::new(Some(backend), None),
        notifier,
    );

    let response = leads.create_lead(orbit_lead()).await.unwrap();
    assert_eq!(response.basic_application_id, "B002BJF");
}

#[tokio::test]
async fn lead_flash_completes_the_created_lead() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isError": false, "result": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SELF_FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(self_fulfillment_success()))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, _) = lifecycle(&server, store.clone());

    leads.create_lead(orbit_lead()).await.unwrap();
    let response = leads.lead_flash(flash_request()).await.unwrap();
    assert_eq!(response.basic_application_id, "B002BJF");
    assert_eq!(response.reference_id.as_deref(), Some("REF-9"));
    assert_eq!(response.message, LEAD_DETAILS_ADDED_MESSAGE);

    assert_eq!(store.lead_count().await, 1);
    let row = store.find_lead_by_basic_app_id("B002BJF").await.unwrap().unwrap();
    assert_eq!(row.processing_stage, ProcessingStage::Completed);
    assert_eq!(row.internal_status, InternalStatus::Completed);
    assert_eq!(row.application_status.as_deref(), Some("Login"));
    assert_eq!(row.company_name.as_deref(), Some("Acme Pvt Ltd"));
    assert!(row.fbb_api_response.is_some());
    assert!(row.self_fullfilment_api_response.is_some());
}

#[tokio::test]
async fn optional_fulfillment_failure_does_not_stop_flash() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FULFILL_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SELF_FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(self_fulfillment_success()))
        .expect(1)
        .mount(&server)
        .await;

    let (leads, _) = lifecycle(&server, Arc::new(MemoryStore::new()));
    let response = leads.lead_flash(flash_request()).await.unwrap();
    assert_eq!(response.basic_application_id, "B002BJF");
}

#[tokio::test]
async fn rejected_flash_records_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isError": false, "result": {} })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SELF_FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isError": true,
            "responseException": { "exceptionMessage": "Property value out of range" }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, _) = lifecycle(&server, store.clone());

    leads.create_lead(orbit_lead()).await.unwrap();
    let err = leads.lead_flash(flash_request()).await.unwrap_err();
    assert!(err.is_upstream());

    let row = store.find_lead_by_basic_app_id("B002BJF").await.unwrap().unwrap();
    assert_eq!(row.processing_stage, ProcessingStage::Fbb);
    assert_eq!(row.internal_status, InternalStatus::Failed);
    assert!(row
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("Property value out of range")));
    assert!(row.self_fullfilment_api_response.is_some());
}

#[tokio::test]
async fn flash_without_business_id_keeps_the_raw_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isError": false, "result": {} })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SELF_FULFILL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isError": false,
            "result": { "applicationStatus": "Login" }
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let (leads, _) = lifecycle(&server, store.clone());

    leads.create_lead(orbit_lead()).await.unwrap();
    let err = leads.lead_flash(flash_request()).await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

    let row = store.find_lead_by_basic_app_id("B002BJF").await.unwrap().unwrap();
    assert_eq!(row.processing_stage, ProcessingStage::Fbb);
    assert_eq!(row.internal_status, InternalStatus::Failed);
    assert!(row
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("Basic Application ID")));
    let raw = row.self_fullfilment_api_response.unwrap();
    assert_eq!(raw["result"]["applicationStatus"], "Login");
}

#[tokio::test]
async fn undeliverable_notification_does_not_fail_create() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fbb_success()))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let stores = StoreRouter::new(
        Some(Backend::from_memory(store.clone())),
        Some(Backend::from_memory(store.clone())),
    );
    let leads = LeadLifecycle::new(basic_client(&server.uri()), stores, Arc::new(FailingNotifier));

    let response = leads.create_lead(orbit_lead()).await.unwrap();
    assert_eq!(response.basic_application_id, "B002BJF");
    assert!(store.find_lead_by_basic_app_id("B002BJF").await.unwrap().is_some());
}

#[tokio::test]
async fn flash_without_application_id_is_a_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(self_fulfillment_success()))
        .expect(0)
        .mount(&server)
        .await;

    let (leads, _) = lifecycle(&server, Arc::new(MemoryStore::new()));
    let mut request = flash_request();
    request.application_id = Some("  ".into());
    let err = leads.lead_flash(request).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn unreachable_upstream_is_a_gateway_error() {
    let client = basic_client("http://127.0.0.1:9");
    let leads = LeadLifecycle::new(
        client,
        StoreRouter::in_memory(),
        Arc::new(RecordingNotifier::default()),
    );
    let err = leads.create_lead(orbit_lead()).await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
}
