use crate::errors::AppError;
use crate::models::OtpResponse;
use crate::notifier::Notifier;
use crate::store::StoreRouter;
use crate::validation::{is_valid_phone, normalize_phone_number};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;

/// Six-digit numeric code.
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// Phone-keyed OTP lifecycle: send, resend and verify.
///
/// Codes are delivered to the normalized number and stored under the number as
/// the caller gave it.
#[derive(Clone)]
pub struct OtpService {
    stores: StoreRouter,
    notifier: Arc<dyn Notifier>,
    ttl: chrono::Duration,
}

impl OtpService {
    pub fn new(stores: StoreRouter, notifier: Arc<dyn Notifier>, ttl: chrono::Duration) -> Self {
        Self {
            stores,
            notifier,
            ttl,
        }
    }

    fn check_phone(phone_number: &str) -> Result<(), AppError> {
        if is_valid_phone(phone_number) {
            Ok(())
        } else {
            tracing::warn!("Invalid phone number format: {}", phone_number);
            Err(AppError::BadRequest("Invalid phone number format".to_string()))
        }
    }

    async fn issue(&self, phone_number: &str, success_message: &str) -> Result<OtpResponse, AppError> {
        Self::check_phone(phone_number)?;
        let store = self.stores.otps()?;

        let normalized = normalize_phone_number(phone_number);
        let otp = generate_otp();
        self.notifier.send_otp(&normalized, &otp).await?;

        let expires_at = chrono::Utc::now() + self.ttl;
        store.set_otp(phone_number, &otp, expires_at).await?;
        tracing::info!("✓ OTP issued for {} (expires {})", phone_number, expires_at);

        Ok(OtpResponse {
            success: true,
            message: success_message.to_string(),
            data: Some(json!({ "phone_number": phone_number })),
        })
    }

    pub async fn send(&self, phone_number: &str) -> Result<OtpResponse, AppError> {
        self.issue(phone_number, "OTP sent successfully").await
    }

    /// Same as `send`; the new code supersedes the previous one.
    pub async fn resend(&self, phone_number: &str) -> Result<OtpResponse, AppError> {
        self.issue(phone_number, "OTP resent successfully").await
    }

    pub async fn verify(&self, phone_number: &str, otp: &str) -> Result<OtpResponse, AppError> {
        Self::check_phone(phone_number)?;
        let store = self.stores.otps()?;

        let Some(record) = store.get_otp(phone_number).await? else {
            return Err(AppError::NotFound("OTP not found or expired".to_string()));
        };

        if record.otp != otp.trim() {
            tracing::warn!("OTP mismatch for {}", phone_number);
            return Err(AppError::BadRequest("Invalid OTP".to_string()));
        }

        // The conditional update is the claim; a concurrent verify that read the
        // same code loses here.
        if !store.mark_otp_as_used(phone_number).await? {
            tracing::warn!("OTP for {} was already used", phone_number);
            return Err(AppError::NotFound("OTP not found or expired".to_string()));
        }
        tracing::info!("✓ OTP verified for {}", phone_number);
        Ok(OtpResponse {
            success: true,
            message: "OTP verified successfully".to_string(),
            data: Some(json!({ "phone_number": phone_number })),
        })
    }
}
