//! WhatsApp delivery through the Gupshup template API.

use crate::circuit_breaker::{create_notifier_circuit_breaker, NotifierBreaker};
use crate::config::{GupshupConfig, TemplateRef};
use crate::errors::AppError;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as _;
use phonenumber::{country::Id as CountryId, Mode};
use serde_json::{json, Value};
use std::time::Duration;

/// Outbound customer messaging.
///
/// Each method returns the provider's response body on acceptance.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp(&self, phone_number: &str, otp: &str) -> Result<Value, AppError>;

    async fn send_lead_created(
        &self,
        phone_number: &str,
        customer_name: &str,
        basic_app_id: &str,
    ) -> Result<Value, AppError>;

    async fn send_lead_status(
        &self,
        phone_number: &str,
        customer_name: &str,
        status: &str,
    ) -> Result<Value, AppError>;
}

/// Formats a number as Gupshup expects it: E.164 digits without the `+`.
///
/// Numbers the phone library cannot parse are passed on with only their digits.
pub fn whatsapp_destination(raw: &str) -> String {
    match phonenumber::parse(Some(CountryId::IN), raw) {
        Ok(number) if phonenumber::is_valid(&number) => number
            .format()
            .mode(Mode::E164)
            .to_string()
            .trim_start_matches('+')
            .to_string(),
        _ => {
            tracing::debug!("Phone {} not recognised by the parser, sending digits as-is", raw);
            raw.chars().filter(|c| c.is_ascii_digit()).collect()
        }
    }
}

pub struct GupshupNotifier {
    client: reqwest::Client,
    config: GupshupConfig,
    breaker: NotifierBreaker,
}

impl GupshupNotifier {
    pub fn new(config: GupshupConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create Gupshup client: {}", e)))?;

        Ok(Self {
            client,
            config,
            breaker: create_notifier_circuit_breaker(),
        })
    }

    fn require_template<'a>(
        template: Option<&'a TemplateRef>,
        name: &str,
    ) -> Result<&'a TemplateRef, AppError> {
        template.ok_or_else(|| {
            AppError::Configuration(format!("WhatsApp {} template is not configured", name))
        })
    }

    async fn deliver(
        &self,
        phone_number: &str,
        template: &TemplateRef,
        params: &[&str],
    ) -> Result<Value, AppError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            AppError::Configuration("GUPSHUP_API_KEY is not configured".to_string())
        })?;
        let source = self.config.source.as_deref().ok_or_else(|| {
            AppError::Configuration("GUPSHUP_SOURCE is not configured".to_string())
        })?;

        let destination = whatsapp_destination(phone_number);
        let template_json = json!({ "id": template.id, "params": params }).to_string();
        let form = [
            ("channel", "whatsapp"),
            ("source", source),
            ("destination", destination.as_str()),
            ("src.name", template.src_name.as_str()),
            ("template", template_json.as_str()),
        ];

        let request = self
            .client
            .post(&self.config.api_url)
            .header("Cache-Control", "no-cache")
            .header("apikey", api_key)
            .form(&form);

        let outcome = self
            .breaker
            .call(async move {
                let response = request.send().await.map_err(|e| {
                    AppError::Notification(format!("Error sending WhatsApp message: {}", e))
                })?;
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if status.as_u16() != 200 && status.as_u16() != 202 {
                    return Err(AppError::Notification(format!(
                        "Failed to send WhatsApp message. Status: {} {}",
                        status.as_u16(),
                        text
                    )));
                }
                let data = match serde_json::from_str::<Value>(&text) {
                    Ok(value @ Value::Object(_)) => value,
                    Ok(other) => json!({ "response": other.to_string() }),
                    Err(_) => json!({ "response": text }),
                };
                Ok(data)
            })
            .await;

        match outcome {
            Ok(data) => {
                tracing::info!("✓ WhatsApp template {} accepted for {}", template.id, destination);
                Ok(data)
            }
            Err(failsafe::Error::Inner(e)) => {
                tracing::warn!("❌ WhatsApp delivery failed: {}", e);
                Err(e)
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("WhatsApp circuit open, send to {} rejected", destination);
                Err(AppError::Notification(
                    "WhatsApp provider temporarily unavailable".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl Notifier for GupshupNotifier {
    async fn send_otp(&self, phone_number: &str, otp: &str) -> Result<Value, AppError> {
        let template = Self::require_template(self.config.otp_template.as_ref(), "OTP")?;
        self.deliver(phone_number, template, &[otp]).await
    }

    async fn send_lead_created(
        &self,
        phone_number: &str,
        customer_name: &str,
        basic_app_id: &str,
    ) -> Result<Value, AppError> {
        let template =
            Self::require_template(self.config.lead_creation_template.as_ref(), "lead creation")?;
        self.deliver(phone_number, template, &[customer_name, basic_app_id])
            .await
    }

    async fn send_lead_status(
        &self,
        phone_number: &str,
        customer_name: &str,
        status: &str,
    ) -> Result<Value, AppError> {
        let template =
            Self::require_template(self.config.lead_status_template.as_ref(), "lead status")?;
        self.deliver(phone_number, template, &[customer_name, status])
            .await
    }
}
