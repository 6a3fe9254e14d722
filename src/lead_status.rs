use crate::basic_client::BasicApiClient;
use crate::errors::{AppError, StepOutcome};
use crate::models::{Environment, LeadRow, LeadStatusRequest, LeadStatusResponse};
use crate::normalizer::{clean_str, json_string};
use crate::notifier::Notifier;
use crate::store::{LeadStore, StoreRouter};
use crate::validation::is_valid_mobile;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const NOT_FOUND_STATUS: &str = "Not Found";
pub const MANUAL_TRACKING_MESSAGE: &str = "We couldn't find your details. You can track your application manually at: https://www.basichomeloan.com/track-your-application";

/// Looks up a lead's latest upstream status, records it and notifies the customer.
#[derive(Clone)]
pub struct LeadStatusTracker {
    client: BasicApiClient,
    stores: StoreRouter,
    notifier: Arc<dyn Notifier>,
    /// GetActivity responses keyed by `basicAppId/mobile`.
    activity_cache: Cache<String, Value>,
}

fn not_found() -> LeadStatusResponse {
    LeadStatusResponse {
        status: NOT_FOUND_STATUS.to_string(),
        message: MANUAL_TRACKING_MESSAGE.to_string(),
    }
}

fn full_name(lead: &LeadRow) -> String {
    [
        lead.customer_first_name.as_deref(),
        lead.customer_last_name.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
}

impl LeadStatusTracker {
    pub fn new(client: BasicApiClient, stores: StoreRouter, notifier: Arc<dyn Notifier>) -> Self {
        let activity_cache = Cache::builder()
            .time_to_live(Duration::from_secs(60))
            .max_capacity(10_000)
            .build();

        Self {
            client,
            stores,
            notifier,
            activity_cache,
        }
    }

    async fn activity(&self, basic_app_id: &str, mobile: &str) -> Result<Value, AppError> {
        let cache_key = format!("{}/{}", basic_app_id, mobile);
        if let Some(cached) = self.activity_cache.get(&cache_key).await {
            tracing::debug!("Activity cache hit for {}", basic_app_id);
            return Ok(cached);
        }

        let activity = self.client.get_activity(basic_app_id, mobile).await?;
        self.activity_cache.insert(cache_key, activity.clone()).await;
        Ok(activity)
    }

    /// Fills in whichever of the two identifiers is missing from the stored leads.
    async fn resolve_identity(
        &self,
        store: Option<&dyn LeadStore>,
        mobile: Option<String>,
        basic_app_id: Option<String>,
    ) -> Option<(String, String)> {
        match (mobile, basic_app_id) {
            (Some(mobile), Some(basic_app_id)) => Some((basic_app_id, mobile)),
            (Some(mobile), None) => {
                let lead = store?.find_lead_by_mobile(&mobile).await.ok().flatten()?;
                Some((lead.basic_app_id?, mobile))
            }
            (None, Some(basic_app_id)) => {
                let lead = store?
                    .find_lead_by_basic_app_id(&basic_app_id)
                    .await
                    .ok()
                    .flatten()?;
                Some((basic_app_id, lead.customer_mobile?))
            }
            (None, None) => None,
        }
    }

    pub async fn track(&self, request: LeadStatusRequest) -> Result<LeadStatusResponse, AppError> {
        let mobile = clean_str(request.mobile_number.as_deref());
        let basic_app_id = clean_str(request.basic_application_id.as_deref());

        if mobile.is_none() && basic_app_id.is_none() {
            return Err(AppError::BadRequest(
                "Either mobile number or basic application ID must be provided".to_string(),
            ));
        }
        if let Some(m) = mobile.as_deref() {
            if !is_valid_mobile(m) {
                return Err(AppError::Validation(
                    "Mobile number must be 10 digits".to_string(),
                ));
            }
        }

        let environment = match clean_str(request.environment.as_deref()) {
            Some(env) => Some(Environment::from_request(Some(&env))?),
            None => None,
        };
        let store = match self.stores.leads(environment) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("Lead store unavailable for status lookup: {}", e);
                None
            }
        };

        let Some((basic_app_id, mobile)) = self
            .resolve_identity(store.as_deref(), mobile, basic_app_id)
            .await
        else {
            tracing::info!("No lead found to track");
            return Ok(not_found());
        };

        let activity = match self.activity(&basic_app_id, &mobile).await {
            Ok(activity) => activity,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                tracing::warn!("GetActivity failed for {}: {}", basic_app_id, e);
                return Ok(not_found());
            }
        };

        let status = activity
            .get("result")
            .and_then(|result| json_string(result, "latestStatus"))
            .unwrap_or_else(|| "Not found".to_string());

        if let Some(store) = store.as_deref() {
            let updated = store.update_application_status(&basic_app_id, &status).await;
            if let Ok(Some(false)) = StepOutcome::optional(updated).resolve("Lead status update") {
                tracing::debug!("No stored lead for {}, status not recorded", basic_app_id);
            }

            let lead = store.find_lead_by_mobile(&mobile).await;
            if let Ok(Some(Some(lead))) = StepOutcome::optional(lead).resolve("Lead lookup") {
                let sent = self
                    .notifier
                    .send_lead_status(&mobile, &full_name(&lead), &status)
                    .await;
                let _ = StepOutcome::optional(sent).resolve("Lead status notification");
            }
        }

        tracing::info!("✓ Lead {} status: {}", basic_app_id, status);
        Ok(LeadStatusResponse {
            message: format!("Your lead status is: {}", status),
            status,
        })
    }
}
