//! Storage seams and the environment-scoped router that picks a backend per table.

use crate::disbursement_models::{
    DisbursementFilter, DisbursementPage, DisbursementRow, DisbursementStatusUpdate, PageRequest,
};
use crate::errors::AppError;
use crate::memory_store::MemoryStore;
use crate::models::{
    Environment, InternalStatus, LeadOperation, LeadRow, LeadSaveSummary, OtpRecord,
    ProcessingStage, UpsertKind,
};
use crate::pg_store::PgStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_lead_by_api_id(&self, api_id: &str) -> Result<Option<LeadRow>, AppError>;

    async fn find_lead_by_basic_app_id(
        &self,
        basic_app_id: &str,
    ) -> Result<Option<LeadRow>, AppError>;

    /// Most recently updated lead for a customer mobile number.
    async fn find_lead_by_mobile(&self, mobile: &str) -> Result<Option<LeadRow>, AppError>;

    async fn insert_lead(&self, row: &LeadRow) -> Result<(), AppError>;

    /// Rewrites every column of the row with the same `id`.
    async fn update_lead(&self, row: &LeadRow) -> Result<(), AppError>;

    /// Returns false when no lead carries `basic_app_id`.
    async fn update_application_status(
        &self,
        basic_app_id: &str,
        status: &str,
    ) -> Result<bool, AppError>;

    /// Looks a lead up by `api_id`, then by `basic_app_id`. First match wins.
    async fn find_lead(
        &self,
        api_id: Option<&str>,
        basic_app_id: Option<&str>,
    ) -> Result<Option<LeadRow>, AppError> {
        if let Some(api_id) = api_id {
            if let Some(row) = self.find_lead_by_api_id(api_id).await? {
                return Ok(Some(row));
            }
        }
        if let Some(basic_app_id) = basic_app_id {
            return self.find_lead_by_basic_app_id(basic_app_id).await;
        }
        Ok(None)
    }
}

#[async_trait]
pub trait DisbursementStore: Send + Sync {
    async fn find_disbursement_by_basic_id(
        &self,
        basic_disbursement_id: &str,
    ) -> Result<Option<DisbursementRow>, AppError>;

    async fn insert_disbursement(&self, row: &DisbursementRow) -> Result<(), AppError>;

    async fn update_disbursement_status(
        &self,
        id: Uuid,
        update: &DisbursementStatusUpdate,
    ) -> Result<(), AppError>;

    /// Filtered page ordered by `processed_at`, newest first.
    async fn query_disbursements(
        &self,
        filter: &DisbursementFilter,
        page: PageRequest,
    ) -> Result<DisbursementPage, AppError>;

    async fn all_disbursements(&self) -> Result<Vec<DisbursementRow>, AppError>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Replaces any OTP stored for `phone_number` with a fresh unused one.
    async fn set_otp(
        &self,
        phone_number: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Latest unused OTP. An expired one is marked used and reads as absent.
    async fn get_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>, AppError>;

    async fn mark_otp_as_used(&self, phone_number: &str) -> Result<bool, AppError>;

    /// Deletes expired rows and returns how many were removed.
    async fn cleanup_expired(&self) -> Result<u64, AppError>;

    async fn is_otp_exists(&self, phone_number: &str) -> Result<bool, AppError> {
        Ok(self.get_otp(phone_number).await?.is_some())
    }
}

/// The three stores of one environment.
#[derive(Clone)]
pub struct Backend {
    pub leads: Arc<dyn LeadStore>,
    pub disbursements: Arc<dyn DisbursementStore>,
    pub otps: Arc<dyn OtpStore>,
}

impl Backend {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            leads: store.clone(),
            disbursements: store.clone(),
            otps: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            leads: store.clone(),
            disbursements: store.clone(),
            otps: store,
        }
    }
}

/// Logical tables known to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Leads,
    Appointments,
    Disbursements,
    Campaigns,
    OtpStorage,
    WhatsappMessages,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Leads => "leads",
            Table::Appointments => "appointments",
            Table::Disbursements => "disbursements",
            Table::Campaigns => "campaigns",
            Table::OtpStorage => "otp_storage",
            Table::WhatsappMessages => "whatsapp_messages",
        }
    }

    /// Static home environment of the table, if it has one.
    pub fn affinity(&self) -> Option<Environment> {
        match self {
            Table::Leads | Table::Appointments | Table::Disbursements | Table::Campaigns => {
                Some(Environment::Orbit)
            }
            Table::OtpStorage => Some(Environment::Homfinity),
            Table::WhatsappMessages => None,
        }
    }
}

/// Routes each table operation to the orbit or homfinity backend.
///
/// Resolution order: explicit override, then table affinity, then the process
/// default (the first configured environment). A missing backend is reported when
/// a call needs it.
#[derive(Clone)]
pub struct StoreRouter {
    orbit: Option<Backend>,
    homfinity: Option<Backend>,
    default_environment: Option<Environment>,
    otp_fallback: Option<Arc<dyn OtpStore>>,
}

impl StoreRouter {
    pub fn new(orbit: Option<Backend>, homfinity: Option<Backend>) -> Self {
        let default_environment = if orbit.is_some() {
            Some(Environment::Orbit)
        } else if homfinity.is_some() {
            Some(Environment::Homfinity)
        } else {
            None
        };
        Self {
            orbit,
            homfinity,
            default_environment,
            otp_fallback: None,
        }
    }

    /// Both environments backed by one shared in-memory store.
    pub fn in_memory() -> Self {
        let backend = Backend::in_memory();
        Self::new(Some(backend.clone()), Some(backend))
    }

    /// OTP store used when the homfinity backend is not available.
    pub fn with_otp_fallback(mut self, store: Arc<dyn OtpStore>) -> Self {
        self.otp_fallback = Some(store);
        self
    }

    pub fn default_environment(&self) -> Option<Environment> {
        self.default_environment
    }

    pub fn is_configured(&self, environment: Environment) -> bool {
        self.slot(environment).is_some()
    }

    fn slot(&self, environment: Environment) -> Option<&Backend> {
        match environment {
            Environment::Orbit => self.orbit.as_ref(),
            Environment::Homfinity => self.homfinity.as_ref(),
        }
    }

    pub fn resolve_environment(
        &self,
        table: Table,
        environment: Option<Environment>,
    ) -> Result<Environment, AppError> {
        environment
            .or_else(|| table.affinity())
            .or(self.default_environment)
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "No database environment configured for table '{}'",
                    table.name()
                ))
            })
    }

    pub fn backend(
        &self,
        table: Table,
        environment: Option<Environment>,
    ) -> Result<&Backend, AppError> {
        let environment = self.resolve_environment(table, environment)?;
        self.slot(environment).ok_or_else(|| {
            AppError::Configuration(format!(
                "Database for environment '{}' is not configured (table '{}')",
                environment,
                table.name()
            ))
        })
    }

    pub fn leads(&self, environment: Option<Environment>) -> Result<Arc<dyn LeadStore>, AppError> {
        Ok(self.backend(Table::Leads, environment)?.leads.clone())
    }

    pub fn disbursements(&self) -> Result<Arc<dyn DisbursementStore>, AppError> {
        Ok(self
            .backend(Table::Disbursements, None)?
            .disbursements
            .clone())
    }

    pub fn otps(&self) -> Result<Arc<dyn OtpStore>, AppError> {
        match self.backend(Table::OtpStorage, None) {
            Ok(backend) => Ok(backend.otps.clone()),
            Err(e) => self.otp_fallback.clone().ok_or(e),
        }
    }
}

/// How a lead write should reconcile with a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadWrite {
    /// The upstream call for this operation succeeded.
    Success(LeadOperation),
    /// The upstream rejected the call.
    Failure,
}

/// Inserts or updates a lead by identity.
///
/// The stored row is looked up by `api_id`, then `basic_app_id`. On success the
/// stage advances monotonically; on failure the stage is kept and the status
/// becomes `failed`, except that a completed record only records the error.
pub async fn upsert_lead(
    store: &dyn LeadStore,
    mut candidate: LeadRow,
    write: LeadWrite,
) -> Result<LeadSaveSummary, AppError> {
    if !candidate.has_identity() {
        return Err(AppError::BadRequest(
            "Lead has neither api_id nor basic_app_id".to_string(),
        ));
    }

    let existing = store
        .find_lead(candidate.api_id.as_deref(), candidate.basic_app_id.as_deref())
        .await?;

    let (row, operation_type) = match existing {
        Some(mut stored) => {
            match write {
                LeadWrite::Success(operation) => {
                    candidate.processing_stage = stored.processing_stage.advance(operation);
                    candidate.internal_status = InternalStatus::for_stage(candidate.processing_stage);
                    stored.absorb(candidate);
                }
                LeadWrite::Failure if stored.processing_stage == ProcessingStage::Completed => {
                    stored.error_message = candidate.error_message;
                    stored.updated_at = candidate.updated_at;
                }
                LeadWrite::Failure => {
                    candidate.processing_stage = stored.processing_stage;
                    candidate.internal_status = InternalStatus::Failed;
                    stored.absorb(candidate);
                }
            }
            store.update_lead(&stored).await?;
            (stored, UpsertKind::Updated)
        }
        None => {
            match write {
                LeadWrite::Success(operation) => {
                    candidate.processing_stage = ProcessingStage::None.advance(operation);
                    candidate.internal_status = InternalStatus::for_stage(candidate.processing_stage);
                }
                LeadWrite::Failure => {
                    candidate.processing_stage = ProcessingStage::None;
                    candidate.internal_status = InternalStatus::Failed;
                }
            }
            store.insert_lead(&candidate).await?;
            (candidate, UpsertKind::Created)
        }
    };

    tracing::info!(
        "✓ Lead {:?}: id={} stage={} status={}",
        operation_type,
        row.id,
        row.processing_stage.as_str(),
        row.internal_status.as_str()
    );

    Ok(LeadSaveSummary {
        lead_id: row.id,
        operation_type,
        processing_stage: row.processing_stage,
        internal_status: row.internal_status,
        api_id: row.api_id,
        basic_app_id: row.basic_app_id,
        customer_mobile: row.customer_mobile,
    })
}
