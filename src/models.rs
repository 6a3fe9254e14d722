use crate::errors::AppError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// ============ Environments & Lifecycle ============

/// One of the two isolated tenant environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Orbit,
    Homfinity,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Orbit, Environment::Homfinity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Orbit => "orbit",
            Environment::Homfinity => "homfinity",
        }
    }

    /// Parses the `environment` field of an inbound request. Absent and unknown
    /// values are both validation failures.
    pub fn from_request(value: Option<&str>) -> Result<Self, AppError> {
        match value.map(str::trim) {
            Some("orbit") => Ok(Environment::Orbit),
            Some("homfinity") => Ok(Environment::Homfinity),
            _ => Err(AppError::Validation(
                "Environment is required and must be either 'orbit' or 'homfinity'".to_string(),
            )),
        }
    }

    pub fn parse_stored(value: &str) -> Option<Self> {
        match value {
            "orbit" => Some(Environment::Orbit),
            "homfinity" => Some(Environment::Homfinity),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lead processing stage. Ordered: `None < Fbb < Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    #[default]
    None,
    Fbb,
    Completed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::None => "none",
            ProcessingStage::Fbb => "fbb",
            ProcessingStage::Completed => "completed",
        }
    }

    /// Unknown stored values read as `None` so a later call can still advance them.
    pub fn parse_stored(value: &str) -> Self {
        match value {
            "fbb" => ProcessingStage::Fbb,
            "completed" => ProcessingStage::Completed,
            _ => ProcessingStage::None,
        }
    }

    /// Stage after a successful `operation` on a record currently at `self`.
    ///
    /// CreateLead moves to `Fbb` but never lowers a `Completed` record; LeadFlash
    /// always lands on `Completed`.
    pub fn advance(self, operation: LeadOperation) -> Self {
        match operation {
            LeadOperation::CreateLead => self.max(ProcessingStage::Fbb),
            LeadOperation::LeadFlash => ProcessingStage::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalStatus {
    FbbCompleted,
    Completed,
    Failed,
}

impl InternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalStatus::FbbCompleted => "fbb_completed",
            InternalStatus::Completed => "completed",
            InternalStatus::Failed => "failed",
        }
    }

    pub fn parse_stored(value: &str) -> Option<Self> {
        match value {
            "fbb_completed" => Some(InternalStatus::FbbCompleted),
            "completed" => Some(InternalStatus::Completed),
            "failed" => Some(InternalStatus::Failed),
            _ => None,
        }
    }

    /// Internal status that accompanies a successfully reached stage.
    pub fn for_stage(stage: ProcessingStage) -> Self {
        match stage {
            ProcessingStage::Completed => InternalStatus::Completed,
            _ => InternalStatus::FbbCompleted,
        }
    }
}

/// The two lead entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadOperation {
    CreateLead,
    LeadFlash,
}

impl LeadOperation {
    /// Value stored in `source_endpoint`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadOperation::CreateLead => "create_lead",
            LeadOperation::LeadFlash => "lead_flash",
        }
    }
}

// ============ Inbound Requests ============

/// Body of `POST /create_lead`.
///
/// Every field is optional at the wire level so that presence is checked by the
/// environment's validation profile with a field-specific message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadCreateRequest {
    /// `orbit` or `homfinity`; selects the validation profile and the store.
    pub environment: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    /// Ten-digit mobile number without country code.
    pub mobile: Option<String>,
    pub credit_score: Option<i64>,
    pub pan: Option<String>,
    /// Loan-type alias such as `home_loan` or `LAP`.
    pub loan_type: Option<String>,
    pub loan_amount_req: Option<f64>,
    /// Tenure in months.
    pub loan_tenure: Option<i64>,
    pub pincode: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
    pub annual_income: Option<f64>,
    pub application_assigned_to_rm: Option<String>,
    pub created_from_pem_id: Option<String>,
    pub credit_score_type_id: Option<String>,
    pub customer_id: Option<String>,
    pub include_credit_score: Option<bool>,
    pub is_lead_prefilled: Option<bool>,
    pub qr_short_code: Option<String>,
    pub remarks: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
}

/// Body of `POST /lead_flash`: the create fields plus the existing application id
/// and the profession, employment and property profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadFlashRequest {
    #[serde(flatten)]
    pub lead: LeadCreateRequest,
    /// Upstream application id returned by `create_lead`. Required.
    pub application_id: Option<String>,
    pub profession_id: Option<String>,
    pub profession_name: Option<String>,
    pub salary_credit_mode_id: Option<String>,
    pub salary_credit_mode_name: Option<String>,
    pub self_company_type_id: Option<String>,
    pub self_company_type_name: Option<String>,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub existing_emis: Option<f64>,
    pub co_borrower_income: Option<f64>,
    #[serde(alias = "propertyIdentified")]
    pub is_property_identified: Option<bool>,
    pub property_type_id: Option<String>,
    pub property_value: Option<f64>,
    pub property_address: Option<String>,
    pub property_city: Option<String>,
    pub property_district: Option<String>,
    pub property_pincode: Option<String>,
    pub property_state: Option<String>,
    pub property_project_name: Option<String>,
    #[serde(rename = "aggrementTypeId", alias = "agreementTypeId")]
    pub agreement_type_id: Option<String>,
    pub loan_usage_type_id: Option<String>,
    pub builder_id: Option<String>,
    pub builder_name: Option<String>,
    pub project_id: Option<String>,
    pub tower_id: Option<String>,
    pub tower_name: Option<String>,
    #[serde(alias = "unitType")]
    pub tower_unit_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadCreateResponse {
    pub basic_application_id: String,
    #[serde(rename = "applicationId")]
    pub application_id: Option<String>,
    pub reference_id: Option<String>,
    pub assigned_to_rm: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadFlashResponse {
    pub basic_application_id: String,
    pub reference_id: Option<String>,
    pub assigned_to_rm: Option<String>,
    pub message: String,
}

// ============ Upstream Payloads ============

/// Payload for `CreateFBBByBasicUser`, also the base of the fulfillment payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FbbPayload {
    pub annual_income: f64,
    pub application_assigned_to_rm: String,
    pub city: String,
    pub created_from_pem_id: String,
    pub credit_score: i64,
    pub credit_score_type_id: String,
    pub customer_id: String,
    pub date_of_birth: String,
    pub district: String,
    pub email: String,
    pub first_name: String,
    pub gender: String,
    pub id: String,
    pub include_credit_score: bool,
    pub is_lead_prefilled: bool,
    pub last_name: String,
    pub loan_amount_req: f64,
    pub loan_tenure: i64,
    /// Upstream loan-type code (`HL`, `LAP`, ...).
    pub loan_type: String,
    pub mobile: String,
    pub pan: String,
    pub pincode: String,
    pub qr_short_code: String,
    pub remarks: String,
    pub state: String,
}

/// Payload for `SelfFullfilment`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfFulfillmentPayload {
    #[serde(flatten)]
    pub base: FbbPayload,
    #[serde(rename = "aggrementTypeId")]
    pub agreement_type_id: String,
    pub builder_id: String,
    pub builder_name: String,
    pub co_borrower_income: Option<f64>,
    pub company_id: String,
    pub company_name: String,
    pub existing_emis: Option<f64>,
    pub is_property_identified: Option<bool>,
    pub loan_usage_type_id: String,
    pub profession_id: String,
    pub profession_name: String,
    pub project_id: String,
    pub property_address: String,
    pub property_city: String,
    pub property_district: String,
    pub property_pincode: String,
    pub property_project_name: String,
    pub property_state: String,
    pub property_type_id: String,
    pub property_value: Option<f64>,
    pub salary_credit_mode_id: String,
    pub self_company_type_id: String,
    pub self_company_type_name: String,
    pub tower_id: String,
    pub tower_name: String,
    pub tower_unit_type: String,
}

// ============ Upstream Responses ============

/// One entry of `responseException.validationErrors`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamValidationError {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseException {
    #[serde(default)]
    pub exception_message: Option<Value>,
    #[serde(default)]
    pub validation_errors: Option<Vec<UpstreamValidationError>>,
}

/// The `{isError, result, responseException}` envelope every upstream call returns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamEnvelope {
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub response_exception: Option<ResponseException>,
}

impl UpstreamEnvelope {
    /// Reads the envelope out of a raw body. Bodies that are not objects read as a
    /// successful envelope with the body as its `result`.
    pub fn from_value(raw: &Value) -> Self {
        match serde_json::from_value::<UpstreamEnvelope>(raw.clone()) {
            Ok(envelope) if raw.is_object() => envelope,
            _ => UpstreamEnvelope {
                is_error: false,
                result: raw.clone(),
                response_exception: None,
            },
        }
    }

    /// Operator-facing message for an `isError` envelope: the exception message
    /// followed by each `name: reason` validation entry.
    pub fn error_message(&self) -> String {
        let Some(exception) = &self.response_exception else {
            return "Upstream reported an error without details".to_string();
        };

        let mut parts = Vec::new();
        match &exception.exception_message {
            Some(Value::String(msg)) if !msg.trim().is_empty() => parts.push(msg.clone()),
            Some(Value::Null) | None => {}
            Some(Value::String(_)) => {}
            Some(other) => parts.push(other.to_string()),
        }
        if let Some(errors) = &exception.validation_errors {
            let joined = errors
                .iter()
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.name.as_deref().unwrap_or("field"),
                        e.reason.as_deref().unwrap_or("invalid")
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            if !joined.is_empty() {
                parts.push(joined);
            }
        }

        if parts.is_empty() {
            "Upstream reported an error without details".to_string()
        } else {
            parts.join(" - ")
        }
    }
}

/// Identities extracted from a successful `CreateFBBByBasicUser` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FbbOutcome {
    pub application_id: Option<String>,
    pub reference_id: Option<String>,
    pub basic_app_id: String,
    pub assigned_to_rm: Option<String>,
}

/// Identities extracted from a successful `SelfFullfilment` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfFulfillmentOutcome {
    pub basic_app_id: String,
    pub reference_id: Option<String>,
    pub assigned_to_rm: Option<String>,
}

// ============ Lead Storage ============

/// Canonical lead row as stored in the `leads` table of either environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRow {
    /// Local row id.
    pub id: Uuid,
    /// Upstream application UUID.
    pub api_id: Option<String>,
    /// Upstream business-facing application code.
    pub basic_app_id: Option<String>,
    pub reference_id: Option<String>,
    pub environment: Environment,
    /// Endpoint of the latest call (`create_lead` or `lead_flash`).
    pub source_endpoint: String,
    pub processing_stage: ProcessingStage,
    pub internal_status: InternalStatus,
    pub application_status: Option<String>,
    pub assigned_to_rm: Option<String>,
    pub customer_first_name: Option<String>,
    pub customer_last_name: Option<String>,
    pub customer_mobile: Option<String>,
    pub customer_email: Option<String>,
    pub customer_pan: Option<String>,
    pub customer_dob: Option<NaiveDate>,
    pub customer_gender: Option<String>,
    pub customer_pincode: Option<String>,
    pub customer_city: Option<String>,
    pub customer_district: Option<String>,
    pub customer_state: Option<String>,
    pub loan_type: Option<String>,
    pub loan_amount_req: Option<BigDecimal>,
    pub loan_tenure: Option<i32>,
    pub annual_income: Option<BigDecimal>,
    pub credit_score: Option<i32>,
    pub profession_name: Option<String>,
    pub company_name: Option<String>,
    pub property_type_id: Option<String>,
    pub property_value: Option<BigDecimal>,
    pub property_city: Option<String>,
    pub property_pincode: Option<String>,
    pub property_project_name: Option<String>,
    pub error_message: Option<String>,
    pub original_request_data: Option<Value>,
    pub fbb_api_response: Option<Value>,
    pub self_fullfilment_api_response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

macro_rules! overwrite_present {
    ($target:expr, $source:expr; $($field:ident),+ $(,)?) => {
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field;
            }
        )+
    };
}

impl LeadRow {
    pub fn new(environment: Environment, operation: LeadOperation) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            api_id: None,
            basic_app_id: None,
            reference_id: None,
            environment,
            source_endpoint: operation.as_str().to_string(),
            processing_stage: ProcessingStage::None,
            internal_status: InternalStatus::FbbCompleted,
            application_status: None,
            assigned_to_rm: None,
            customer_first_name: None,
            customer_last_name: None,
            customer_mobile: None,
            customer_email: None,
            customer_pan: None,
            customer_dob: None,
            customer_gender: None,
            customer_pincode: None,
            customer_city: None,
            customer_district: None,
            customer_state: None,
            loan_type: None,
            loan_amount_req: None,
            loan_tenure: None,
            annual_income: None,
            credit_score: None,
            profession_name: None,
            company_name: None,
            property_type_id: None,
            property_value: None,
            property_city: None,
            property_pincode: None,
            property_project_name: None,
            error_message: None,
            original_request_data: None,
            fbb_api_response: None,
            self_fullfilment_api_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_identity(&self) -> bool {
        self.api_id.is_some() || self.basic_app_id.is_some()
    }

    /// Folds a newer candidate row into this stored row.
    ///
    /// Identity columns and `created_at` are kept; absent identity halves are
    /// filled in. Present payload fields overwrite, absent ones keep the stored
    /// value. Stage and status are taken from the candidate, which the caller has
    /// already reconciled with this row.
    pub fn absorb(&mut self, candidate: LeadRow) {
        if self.api_id.is_none() {
            self.api_id = candidate.api_id;
        }
        if self.basic_app_id.is_none() {
            self.basic_app_id = candidate.basic_app_id;
        }
        overwrite_present!(self, candidate;
            reference_id, application_status, assigned_to_rm,
            customer_first_name, customer_last_name, customer_mobile, customer_email,
            customer_pan, customer_dob, customer_gender, customer_pincode,
            customer_city, customer_district, customer_state,
            loan_type, loan_amount_req, loan_tenure, annual_income, credit_score,
            profession_name, company_name, property_type_id, property_value,
            property_city, property_pincode, property_project_name,
            original_request_data, fbb_api_response, self_fullfilment_api_response,
        );
        self.environment = candidate.environment;
        self.source_endpoint = candidate.source_endpoint;
        self.processing_stage = candidate.processing_stage;
        self.internal_status = candidate.internal_status;
        self.error_message = candidate.error_message;
        self.updated_at = candidate.updated_at;
    }
}

/// Result of a lead upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadSaveSummary {
    pub lead_id: Uuid,
    pub operation_type: UpsertKind,
    pub processing_stage: ProcessingStage,
    pub internal_status: InternalStatus,
    pub api_id: Option<String>,
    pub basic_app_id: Option<String>,
    pub customer_mobile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    Created,
    Updated,
}

// ============ OTP ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub phone_number: String,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OtpSendRequest {
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OtpVerifyRequest {
    pub phone_number: String,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OtpResponse {
    pub success: bool,
    pub message: String,
    #[schema(value_type = Object)]
    pub data: Option<Value>,
}

// ============ Lead Status ============

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct LeadStatusRequest {
    pub mobile_number: Option<String>,
    pub basic_application_id: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeadStatusResponse {
    pub status: String,
    pub message: String,
}
