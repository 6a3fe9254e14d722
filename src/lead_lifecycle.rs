//! CreateLead and LeadFlash workflows: validation, the upstream call sequence and
//! the lead upsert.

use crate::basic_client::BasicApiClient;
use crate::errors::{AppError, StepOutcome};
use crate::models::{
    Environment, FbbOutcome, FbbPayload, LeadCreateRequest, LeadCreateResponse, LeadFlashRequest,
    LeadFlashResponse, LeadOperation, LeadRow, LeadSaveSummary, SelfFulfillmentOutcome,
    SelfFulfillmentPayload, UpstreamEnvelope,
};
use crate::normalizer::{
    apply_flash_fields, apply_upstream_result, format_upstream_date, json_string,
    lead_row_from_request,
};
use crate::notifier::Notifier;
use crate::store::{upsert_lead, LeadWrite, StoreRouter};
use crate::validation::validate_lead;
use serde_json::Value;
use std::sync::Arc;

pub const LEAD_CREATED_MESSAGE: &str = "Lead Created Successfully.";
pub const LEAD_DETAILS_ADDED_MESSAGE: &str = "Lead Details Added Successfully.";

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Upstream payload for FBB creation and the optional fulfillment call.
pub fn build_fbb_payload(
    request: &LeadCreateRequest,
    loan_type_code: &str,
    application_id: Option<&str>,
) -> FbbPayload {
    FbbPayload {
        annual_income: request.annual_income.unwrap_or(0.0),
        application_assigned_to_rm: text(&request.application_assigned_to_rm),
        city: text(&request.city),
        created_from_pem_id: text(&request.created_from_pem_id),
        credit_score: request.credit_score.unwrap_or(0),
        credit_score_type_id: text(&request.credit_score_type_id),
        customer_id: text(&request.customer_id),
        date_of_birth: request
            .date_of_birth
            .as_deref()
            .map(format_upstream_date)
            .unwrap_or_default(),
        district: text(&request.district),
        email: text(&request.email),
        first_name: text(&request.first_name),
        gender: text(&request.gender),
        id: application_id.unwrap_or_default().to_string(),
        include_credit_score: request.include_credit_score.unwrap_or(true),
        is_lead_prefilled: request.is_lead_prefilled.unwrap_or(false),
        last_name: text(&request.last_name),
        loan_amount_req: request.loan_amount_req.unwrap_or(0.0),
        loan_tenure: request.loan_tenure.unwrap_or(0),
        loan_type: loan_type_code.to_string(),
        mobile: text(&request.mobile),
        pan: text(&request.pan).to_uppercase(),
        pincode: text(&request.pincode),
        qr_short_code: text(&request.qr_short_code),
        remarks: text(&request.remarks),
        state: text(&request.state),
    }
}

pub fn build_self_fulfillment_payload(
    request: &LeadFlashRequest,
    loan_type_code: &str,
    application_id: &str,
) -> SelfFulfillmentPayload {
    SelfFulfillmentPayload {
        base: build_fbb_payload(&request.lead, loan_type_code, Some(application_id)),
        agreement_type_id: text(&request.agreement_type_id),
        builder_id: text(&request.builder_id),
        builder_name: text(&request.builder_name),
        co_borrower_income: request.co_borrower_income,
        company_id: text(&request.company_id),
        company_name: text(&request.company_name),
        existing_emis: request.existing_emis,
        is_property_identified: request.is_property_identified,
        loan_usage_type_id: text(&request.loan_usage_type_id),
        profession_id: text(&request.profession_id),
        profession_name: text(&request.profession_name),
        project_id: text(&request.project_id),
        property_address: text(&request.property_address),
        property_city: text(&request.property_city),
        property_district: text(&request.property_district),
        property_pincode: text(&request.property_pincode),
        property_project_name: text(&request.property_project_name),
        property_state: text(&request.property_state),
        property_type_id: text(&request.property_type_id),
        property_value: request.property_value,
        salary_credit_mode_id: text(&request.salary_credit_mode_id),
        self_company_type_id: text(&request.self_company_type_id),
        self_company_type_name: text(&request.self_company_type_name),
        tower_id: text(&request.tower_id),
        tower_name: text(&request.tower_name),
        tower_unit_type: text(&request.tower_unit_type),
    }
}

/// `refId` of the first `applicationComments` entry, in the order the upstream sent them.
pub fn first_comment_ref(result: &Value) -> Option<String> {
    let comments = result.get("applicationComments")?.as_array()?;
    if comments.len() > 1 {
        tracing::debug!(
            "{} application comments returned, taking the first refId",
            comments.len()
        );
    }
    comments.first().and_then(|c| json_string(c, "refId"))
}

fn missing_business_identity() -> AppError {
    tracing::error!("Failed to extract Basic Application ID from upstream response");
    AppError::upstream(400, "Failed to generate Basic Application ID")
}

pub fn extract_fbb_outcome(result: &Value) -> Result<FbbOutcome, AppError> {
    let basic_app_id = json_string(result, "basicAppId").ok_or_else(missing_business_identity)?;
    Ok(FbbOutcome {
        application_id: json_string(result, "id"),
        reference_id: first_comment_ref(result),
        basic_app_id,
        assigned_to_rm: json_string(result, "applicationAssignedToRm"),
    })
}

pub fn extract_self_fulfillment_outcome(result: &Value) -> Result<SelfFulfillmentOutcome, AppError> {
    let basic_app_id = json_string(result, "basicAppId").ok_or_else(missing_business_identity)?;
    Ok(SelfFulfillmentOutcome {
        basic_app_id,
        reference_id: first_comment_ref(result).or_else(|| json_string(result, "id")),
        assigned_to_rm: json_string(result, "applicationAssignedToRm"),
    })
}

/// Turns an `isError` envelope into an upstream error. Returns the envelope otherwise.
fn accept_envelope(raw: &Value, step: &str) -> Result<UpstreamEnvelope, AppError> {
    let envelope = UpstreamEnvelope::from_value(raw);
    if envelope.is_error {
        let message = envelope.error_message();
        tracing::error!("{} rejected by upstream: {}", step, message);
        return Err(AppError::upstream(200, format!("{} failed: {}", step, message)));
    }
    Ok(envelope)
}

fn customer_name(request: &LeadCreateRequest) -> String {
    [request.first_name.as_deref(), request.last_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Orchestrates the lead workflows against the upstream API and the stores.
#[derive(Clone)]
pub struct LeadLifecycle {
    client: BasicApiClient,
    stores: StoreRouter,
    notifier: Arc<dyn Notifier>,
}

impl LeadLifecycle {
    pub fn new(client: BasicApiClient, stores: StoreRouter, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            stores,
            notifier,
        }
    }

    /// Best-effort upsert into the environment's lead store.
    async fn persist(
        &self,
        environment: Environment,
        row: LeadRow,
        write: LeadWrite,
    ) -> Option<LeadSaveSummary> {
        let result = match self.stores.leads(Some(environment)) {
            Ok(store) => upsert_lead(store.as_ref(), row, write).await,
            Err(e) => Err(e),
        };
        StepOutcome::optional(result)
            .resolve("Lead persistence")
            .ok()
            .flatten()
    }

    pub async fn create_lead(
        &self,
        request: LeadCreateRequest,
    ) -> Result<LeadCreateResponse, AppError> {
        let validated = validate_lead(&request)?;
        tracing::info!(
            "Starting lead creation for {} ({})",
            customer_name(&request),
            validated.environment
        );

        let payload = build_fbb_payload(&request, validated.loan_type_code, None);
        let raw = StepOutcome::required(self.client.create_fbb(&payload).await)
            .resolve("CreateFBBByBasicUser")?
            .unwrap_or_default();

        // A rejected CreateLead has no identity to attach a failure record to.
        let envelope = accept_envelope(&raw, "FBB creation")?;
        let outcome = extract_fbb_outcome(&envelope.result)?;

        let mut row = lead_row_from_request(validated.environment, LeadOperation::CreateLead, &request);
        row.loan_type = Some(validated.loan_type_code.to_string());
        apply_upstream_result(&mut row, &envelope.result);
        row.api_id = outcome.application_id.clone();
        row.basic_app_id = Some(outcome.basic_app_id.clone());
        row.reference_id = outcome.reference_id.clone();
        row.assigned_to_rm = outcome.assigned_to_rm.clone();
        row.fbb_api_response = Some(raw);

        if let Some(summary) = self
            .persist(
                validated.environment,
                row,
                LeadWrite::Success(LeadOperation::CreateLead),
            )
            .await
        {
            tracing::info!(
                "Lead data {:?} in database with ID: {}",
                summary.operation_type,
                summary.lead_id
            );
        }

        if let Some(mobile) = request.mobile.as_deref() {
            let sent = self
                .notifier
                .send_lead_created(mobile, &customer_name(&request), &outcome.basic_app_id)
                .await;
            if let Err(e) = sent {
                tracing::warn!("Lead creation notification failed, continuing: {}", e);
            }
        }

        tracing::info!("✓ Lead created - Basic App ID: {}", outcome.basic_app_id);
        Ok(LeadCreateResponse {
            basic_application_id: outcome.basic_app_id,
            application_id: outcome.application_id,
            reference_id: outcome.reference_id,
            assigned_to_rm: outcome.assigned_to_rm,
            message: LEAD_CREATED_MESSAGE.to_string(),
        })
    }

    pub async fn lead_flash(&self, request: LeadFlashRequest) -> Result<LeadFlashResponse, AppError> {
        let validated = validate_lead(&request.lead)?;
        let application_id = request
            .application_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("applicationId is required".to_string()))?
            .to_string();
        tracing::info!("Starting lead flash for application {}", application_id);

        let fulfillment_payload =
            build_fbb_payload(&request.lead, validated.loan_type_code, Some(&application_id));
        let fulfillment = self
            .client
            .fulfill_by_application(&fulfillment_payload)
            .await
            .and_then(|raw| accept_envelope(&raw, "Basic fulfillment").map(|_| ()));
        StepOutcome::optional(fulfillment).resolve("FullfilmentByBasic")?;

        let payload =
            build_self_fulfillment_payload(&request, validated.loan_type_code, &application_id);
        let attempt = match self.client.self_fulfillment(&payload).await {
            Ok(raw) => {
                let accepted = accept_envelope(&raw, "Self fulfillment").and_then(|envelope| {
                    extract_self_fulfillment_outcome(&envelope.result)
                        .map(|outcome| (envelope, outcome))
                });
                match accepted {
                    Ok((envelope, outcome)) => Ok((raw, envelope, outcome)),
                    Err(e) => Err((Some(raw), e)),
                }
            }
            Err(e) => Err((None, e)),
        };

        let (raw, envelope, outcome) = match attempt {
            Ok(ok) => ok,
            Err((raw, error)) => {
                if error.is_upstream() {
                    let mut row = self.flash_row(&request, &validated, &application_id);
                    row.error_message = Some(error.to_string());
                    row.self_fullfilment_api_response = raw;
                    self.persist(validated.environment, row, LeadWrite::Failure)
                        .await;
                }
                tracing::error!("❌ SelfFullfilment failed: {}", error);
                return Err(error);
            }
        };

        let mut row = self.flash_row(&request, &validated, &application_id);
        apply_upstream_result(&mut row, &envelope.result);
        row.basic_app_id = Some(outcome.basic_app_id.clone());
        row.reference_id = outcome.reference_id.clone();
        row.assigned_to_rm = outcome.assigned_to_rm.clone();
        row.self_fullfilment_api_response = Some(raw);

        if let Some(summary) = self
            .persist(
                validated.environment,
                row,
                LeadWrite::Success(LeadOperation::LeadFlash),
            )
            .await
        {
            tracing::info!(
                "Lead flash data {:?} in database with ID: {}",
                summary.operation_type,
                summary.lead_id
            );
        }

        tracing::info!("✓ Lead flash completed - Basic App ID: {}", outcome.basic_app_id);
        Ok(LeadFlashResponse {
            basic_application_id: outcome.basic_app_id,
            reference_id: outcome.reference_id,
            assigned_to_rm: outcome.assigned_to_rm,
            message: LEAD_DETAILS_ADDED_MESSAGE.to_string(),
        })
    }

    fn flash_row(
        &self,
        request: &LeadFlashRequest,
        validated: &crate::validation::ValidatedLead,
        application_id: &str,
    ) -> LeadRow {
        let mut row =
            lead_row_from_request(validated.environment, LeadOperation::LeadFlash, &request.lead);
        apply_flash_fields(&mut row, request);
        row.loan_type = Some(validated.loan_type_code.to_string());
        row.api_id = Some(application_id.to_string());
        row
    }
}
