use crate::config::Config;
use crate::errors::AppError;
use crate::models::{FbbPayload, SelfFulfillmentPayload};
use crate::signing::{self, CredentialKind, Credentials};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const CREATE_FBB_PATH: &str = "/api/v1/NewApplication/CreateFBBByBasicUser";
pub const FULFILLMENT_PATH: &str = "/api/v1/NewApplication/FullfilmentByBasic";
pub const SELF_FULFILLMENT_PATH: &str = "/api/v1/NewApplication/SelfFullfilment";
pub const ACTIVITY_PATH: &str = "/api/v1/Application/Activity/GetActivity";

/// Signed client for the Basic Application API.
///
/// Stateless apart from its configuration. No call is retried here.
#[derive(Clone)]
pub struct BasicApiClient {
    client: reqwest::Client,
    base_url: Option<String>,
    standard: Option<Credentials>,
    agent: Option<Credentials>,
}

impl BasicApiClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Self::with_parts(
            config.basic_api_url.clone(),
            config.standard_credentials(),
            config.agent_credentials(),
            Duration::from_secs(config.basic_api_timeout_secs),
        )
    }

    pub fn with_parts(
        base_url: Option<String>,
        standard: Option<Credentials>,
        agent: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::Internal(format!("Failed to create Basic Application client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            standard,
            agent,
        })
    }

    /// Agent calls use the agent pair when configured and fall back to the
    /// standard pair otherwise.
    fn credentials(&self, kind: CredentialKind) -> Result<&Credentials, AppError> {
        let chosen = match kind {
            CredentialKind::Agent => self.agent.as_ref().or(self.standard.as_ref()),
            CredentialKind::Standard => self.standard.as_ref(),
        };
        chosen.ok_or_else(|| {
            AppError::Configuration("Basic Application API credentials not configured".to_string())
        })
    }

    fn endpoint(&self, path: &str) -> Result<String, AppError> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            AppError::Configuration("Basic Application API URL not configured".to_string())
        })?;
        Ok(format!("{}{}", base, path))
    }

    /// Issues one signed call and returns the parsed body.
    ///
    /// Only 200/201 with a non-empty JSON body is a success.
    async fn call<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&B>,
        kind: CredentialKind,
    ) -> Result<Value, AppError> {
        let credentials = self.credentials(kind)?;
        let bytes = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| AppError::Internal(format!("Failed to serialize {} payload: {}", operation, e)))?;

        let headers = signing::sign(url, &method, bytes.as_deref(), credentials)?;
        tracing::info!("Calling Basic Application API {} ({} {})", operation, method, url);

        let mut request = headers.apply(self.client.request(method, url));
        if let Some(bytes) = bytes {
            request = request.body(bytes);
        }

        let response = request.send().await.map_err(|e| AppError::Upstream {
            status: None,
            message: format!("Error calling Basic Application API ({}): {}", operation, e),
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status != StatusCode::OK && status != StatusCode::CREATED {
            tracing::error!("❌ {} returned {}: {}", operation, status, text);
            return Err(AppError::upstream(
                status.as_u16(),
                format!("{} failed ({}): {}", operation, status, text),
            ));
        }

        if text.trim().is_empty() {
            return Err(AppError::MalformedUpstream(format!(
                "Empty response received from Basic Application API - {}",
                operation
            )));
        }

        let value: Value = serde_json::from_str(&text).map_err(|_| {
            AppError::MalformedUpstream(format!(
                "Invalid JSON response from Basic Application API - {}: {}",
                operation, text
            ))
        })?;

        tracing::info!("✓ {} responded {}", operation, status);
        Ok(value)
    }

    pub async fn create_fbb(&self, payload: &FbbPayload) -> Result<Value, AppError> {
        let url = self.endpoint(CREATE_FBB_PATH)?;
        self.call("CreateFBBByBasicUser", Method::POST, &url, Some(payload), CredentialKind::Standard)
            .await
    }

    /// Optional fulfillment of an existing application. The payload's `id` is the
    /// application id.
    pub async fn fulfill_by_application(&self, payload: &FbbPayload) -> Result<Value, AppError> {
        let url = self.endpoint(FULFILLMENT_PATH)?;
        self.call("FullfilmentByBasic", Method::POST, &url, Some(payload), CredentialKind::Agent)
            .await
    }

    pub async fn self_fulfillment(
        &self,
        payload: &SelfFulfillmentPayload,
    ) -> Result<Value, AppError> {
        let url = self.endpoint(SELF_FULFILLMENT_PATH)?;
        self.call("SelfFullfilment", Method::PUT, &url, Some(payload), CredentialKind::Standard)
            .await
    }

    pub async fn get_activity(&self, basic_app_id: &str, mobile: &str) -> Result<Value, AppError> {
        let base = self.endpoint(ACTIVITY_PATH)?;
        let mut url = Url::parse(&base)
            .map_err(|e| AppError::Configuration(format!("Invalid Basic Application API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Configuration("Basic Application API URL cannot be a base".to_string()))?
            .push(basic_app_id)
            .push(mobile);

        self.call::<Value>("GetActivity", Method::GET, url.as_str(), None, CredentialKind::Standard)
            .await
    }
}
