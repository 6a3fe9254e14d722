//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use loan_orchestrator::errors::AppError;
use loan_orchestrator::models::{LeadCreateRequest, LeadRow};
use loan_orchestrator::notifier::Notifier;
use loan_orchestrator::signing::Credentials;
use loan_orchestrator::basic_client::BasicApiClient;
use loan_orchestrator::store::LeadStore;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// One captured notification: `(kind, phone, params)`.
pub type Sent = (String, String, Vec<String>);

/// Notifier that records every call instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    fn record(&self, kind: &str, phone: &str, params: &[&str]) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((
                kind.to_string(),
                phone.to_string(),
                params.iter().map(|p| p.to_string()).collect(),
            ));
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Last OTP delivered to `phone`.
    pub fn last_otp(&self, phone: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(kind, to, _)| kind == "otp" && to == phone)
            .and_then(|(_, _, params)| params.into_iter().next())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_otp(&self, phone_number: &str, otp: &str) -> Result<Value, AppError> {
        self.record("otp", phone_number, &[otp]);
        Ok(Value::Null)
    }

    async fn send_lead_created(
        &self,
        phone_number: &str,
        customer_name: &str,
        basic_app_id: &str,
    ) -> Result<Value, AppError> {
        self.record("lead_created", phone_number, &[customer_name, basic_app_id]);
        Ok(Value::Null)
    }

    async fn send_lead_status(
        &self,
        phone_number: &str,
        customer_name: &str,
        status: &str,
    ) -> Result<Value, AppError> {
        self.record("lead_status", phone_number, &[customer_name, status]);
        Ok(Value::Null)
    }
}

/// Lead store whose every operation fails.
pub struct BrokenLeadStore;

fn broken() -> AppError {
    AppError::Store("connection refused".to_string())
}

#[async_trait]
impl LeadStore for BrokenLeadStore {
    async fn find_lead_by_api_id(&self, _: &str) -> Result<Option<LeadRow>, AppError> {
        Err(broken())
    }
    async fn find_lead_by_basic_app_id(&self, _: &str) -> Result<Option<LeadRow>, AppError> {
        Err(broken())
    }
    async fn find_lead_by_mobile(&self, _: &str) -> Result<Option<LeadRow>, AppError> {
        Err(broken())
    }
    async fn insert_lead(&self, _: &LeadRow) -> Result<(), AppError> {
        Err(broken())
    }
    async fn update_lead(&self, _: &LeadRow) -> Result<(), AppError> {
        Err(broken())
    }
    async fn update_application_status(&self, _: &str, _: &str) -> Result<bool, AppError> {
        Err(broken())
    }
}

pub fn basic_client(base_url: &str) -> BasicApiClient {
    BasicApiClient::with_parts(
        Some(base_url.to_string()),
        Some(Credentials::new("test-user", "test-key")),
        None,
        Duration::from_secs(5),
    )
    .expect("client builds")
}

pub fn orbit_lead() -> LeadCreateRequest {
    LeadCreateRequest {
        environment: Some("orbit".into()),
        first_name: Some("Asha".into()),
        last_name: Some("Verma".into()),
        gender: Some("female".into()),
        mobile: Some("9876543210".into()),
        credit_score: Some(760),
        pan: Some("ABCDE1234F".into()),
        loan_type: Some("home_loan".into()),
        loan_amount_req: Some(2_500_000.0),
        loan_tenure: Some(240),
        pincode: Some("560001".into()),
        email: Some("asha.verma@example.com".into()),
        date_of_birth: Some("15/03/1990".into()),
        ..Default::default()
    }
}

/// Notifier whose provider always refuses delivery.
pub struct FailingNotifier;

fn undeliverable() -> AppError {
    AppError::Notification("provider unavailable".to_string())
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send_otp(&self, _: &str, _: &str) -> Result<Value, AppError> {
        Err(undeliverable())
    }
    async fn send_lead_created(&self, _: &str, _: &str, _: &str) -> Result<Value, AppError> {
        Err(undeliverable())
    }
    async fn send_lead_status(&self, _: &str, _: &str, _: &str) -> Result<Value, AppError> {
        Err(undeliverable())
    }
}
