/// OTP lifecycle and WhatsApp delivery against a mocked Gupshup endpoint.
mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::RecordingNotifier;
use loan_orchestrator::errors::AppError;
use loan_orchestrator::config::{GupshupConfig, TemplateRef};
use loan_orchestrator::memory_store::MemoryStore;
use loan_orchestrator::notifier::{GupshupNotifier, Notifier};
use loan_orchestrator::otp::OtpService;
use loan_orchestrator::models::OtpRecord;
use loan_orchestrator::store::{OtpStore, StoreRouter};
use std::sync::Arc;
use tokio::sync::Barrier;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gupshup_config(base: &str) -> GupshupConfig {
    GupshupConfig {
        api_url: format!("{}/wa/api/v1/template/msg", base),
        api_key: Some("gs-key".into()),
        source: Some("919000000000".into()),
        otp_template: Some(TemplateRef {
            id: "otp-template".into(),
            src_name: "homfinity".into(),
        }),
        lead_creation_template: None,
        lead_status_template: None,
    }
}

#[tokio::test]
async fn otp_is_posted_as_a_template_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wa/api/v1/template/msg"))
        .and(header("apikey", "gs-key"))
        .and(body_string_contains("channel=whatsapp"))
        .and(body_string_contains("destination=919876543210"))
        .and(body_string_contains("src.name=homfinity"))
        .and(body_string_contains("otp-template"))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(serde_json::json!({ "status": "submitted" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let notifier = GupshupNotifier::new(gupshup_config(&server.uri())).unwrap();
    let response = notifier.send_otp("+919876543210", "482913").await.unwrap();
    assert_eq!(response["status"], "submitted");
}

#[tokio::test]
async fn provider_rejection_is_a_notification_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let notifier = GupshupNotifier::new(gupshup_config(&server.uri())).unwrap();
    let err = notifier.send_otp("9876543210", "111111").await.unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn missing_template_is_a_configuration_error() {
    let notifier = GupshupNotifier::new(gupshup_config("http://127.0.0.1:9")).unwrap();
    let err = notifier
        .send_lead_status("9876543210", "Asha Verma", "Login")
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

fn otp_service(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> OtpService {
    let stores = StoreRouter::new(None, None).with_otp_fallback(store);
    OtpService::new(stores, notifier, chrono::Duration::minutes(5))
}

#[tokio::test]
async fn otp_send_then_verify() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let otp = otp_service(store.clone(), notifier.clone());

    let sent = otp.send("9876543210").await.unwrap();
    assert!(sent.success);
    assert_eq!(sent.message, "OTP sent successfully");

    let code = notifier.last_otp("+919876543210").unwrap();
    assert!(store.is_otp_exists("9876543210").await.unwrap());

    let verified = otp.verify("9876543210", &code).await.unwrap();
    assert_eq!(verified.message, "OTP verified successfully");

    // A used code cannot be verified twice.
    let err = otp.verify("9876543210", &code).await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_code_is_rejected_and_kept() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let otp = otp_service(store.clone(), notifier.clone());

    otp.send("9876543210").await.unwrap();
    let code = notifier.last_otp("+919876543210").unwrap();
    let wrong = if code == "123456" { "654321" } else { "123456" };

    let err = otp.verify("9876543210", wrong).await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    assert!(otp.verify("9876543210", &code).await.is_ok());
}

#[tokio::test]
async fn resend_supersedes_the_previous_code() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let otp = otp_service(store.clone(), notifier.clone());

    otp.send("9876543210").await.unwrap();
    let first = notifier.last_otp("+919876543210").unwrap();
    let resent = otp.resend("9876543210").await.unwrap();
    assert_eq!(resent.message, "OTP resent successfully");
    let second = notifier.last_otp("+919876543210").unwrap();

    let stored = store.get_otp("9876543210").await.unwrap().unwrap();
    assert_eq!(stored.otp, second);
    if first != second {
        assert!(otp.verify("9876543210", &first).await.is_err());
    }
}

#[tokio::test]
async fn verify_without_a_code_is_not_found() {
    let otp = otp_service(Arc::new(MemoryStore::new()), Arc::new(RecordingNotifier::default()));
    let err = otp.verify("9876543210", "123456").await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_phone_is_rejected_before_delivery() {
    let notifier = Arc::new(RecordingNotifier::default());
    let otp = otp_service(Arc::new(MemoryStore::new()), notifier.clone());
    let err = otp.send("12").await.unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn missing_otp_store_is_a_configuration_error() {
    let otp = OtpService::new(
        StoreRouter::new(None, None),
        Arc::new(RecordingNotifier::default()),
        chrono::Duration::minutes(5),
    );
    let err = otp.send("9876543210").await.unwrap_err();
    assert!(err.is_configuration());
}

/// Holds every reader until two of them have read, so both see the same code.
struct PairedReads {
    inner: Arc<MemoryStore>,
    barrier: Barrier,
}

#[async_trait]
impl OtpStore for PairedReads {
    async fn set_otp(
        &self,
        phone_number: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.set_otp(phone_number, otp, expires_at).await
    }

    async fn get_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>, AppError> {
        let record = self.inner.get_otp(phone_number).await?;
        self.barrier.wait().await;
        Ok(record)
    }

    async fn mark_otp_as_used(&self, phone_number: &str) -> Result<bool, AppError> {
        self.inner.mark_otp_as_used(phone_number).await
    }

    async fn cleanup_expired(&self) -> Result<u64, AppError> {
        self.inner.cleanup_expired().await
    }
}

#[tokio::test]
async fn concurrent_verifies_consume_the_code_once() {
    let memory = Arc::new(MemoryStore::new());
    memory
        .set_otp("9876543210", "482913", Utc::now() + chrono::Duration::minutes(5))
        .await
        .unwrap();
    let store = Arc::new(PairedReads {
        inner: memory,
        barrier: Barrier::new(2),
    });
    let otp = OtpService::new(
        StoreRouter::new(None, None).with_otp_fallback(store),
        Arc::new(RecordingNotifier::default()),
        chrono::Duration::minutes(5),
    );

    let (a, b) = tokio::join!(
        otp.verify("9876543210", "482913"),
        otp.verify("9876543210", "482913")
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let loser = a.err().or(b.err()).unwrap();
    assert_eq!(loser.status_code(), axum::http::StatusCode::NOT_FOUND);
}
