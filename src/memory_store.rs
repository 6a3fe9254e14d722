//! In-process store used as the OTP fallback and as the backend in tests.

use crate::disbursement_models::{
    DisbursementFilter, DisbursementPage, DisbursementRow, DisbursementStatusUpdate, PageRequest,
};
use crate::errors::AppError;
use crate::models::{LeadRow, OtpRecord};
use crate::store::{DisbursementStore, LeadStore, OtpStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    leads: RwLock<Vec<LeadRow>>,
    disbursements: RwLock<Vec<DisbursementRow>>,
    otps: DashMap<String, OtpRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lead_count(&self) -> usize {
        self.leads.read().await.len()
    }

    pub async fn disbursement_count(&self) -> usize {
        self.disbursements.read().await.len()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn find_lead_by_api_id(&self, api_id: &str) -> Result<Option<LeadRow>, AppError> {
        Ok(self
            .leads
            .read()
            .await
            .iter()
            .find(|row| row.api_id.as_deref() == Some(api_id))
            .cloned())
    }

    async fn find_lead_by_basic_app_id(
        &self,
        basic_app_id: &str,
    ) -> Result<Option<LeadRow>, AppError> {
        Ok(self
            .leads
            .read()
            .await
            .iter()
            .find(|row| row.basic_app_id.as_deref() == Some(basic_app_id))
            .cloned())
    }

    async fn find_lead_by_mobile(&self, mobile: &str) -> Result<Option<LeadRow>, AppError> {
        Ok(self
            .leads
            .read()
            .await
            .iter()
            .filter(|row| row.customer_mobile.as_deref() == Some(mobile))
            .max_by_key(|row| row.updated_at)
            .cloned())
    }

    async fn insert_lead(&self, row: &LeadRow) -> Result<(), AppError> {
        let mut leads = self.leads.write().await;
        if leads.iter().any(|r| r.id == row.id) {
            return Err(AppError::Store(format!("Lead {} already exists", row.id)));
        }
        leads.push(row.clone());
        Ok(())
    }

    async fn update_lead(&self, row: &LeadRow) -> Result<(), AppError> {
        let mut leads = self.leads.write().await;
        match leads.iter_mut().find(|r| r.id == row.id) {
            Some(slot) => {
                *slot = row.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Lead {} not found", row.id))),
        }
    }

    async fn update_application_status(
        &self,
        basic_app_id: &str,
        status: &str,
    ) -> Result<bool, AppError> {
        let mut leads = self.leads.write().await;
        let mut updated = false;
        for row in leads
            .iter_mut()
            .filter(|r| r.basic_app_id.as_deref() == Some(basic_app_id))
        {
            row.application_status = Some(status.to_string());
            row.updated_at = Utc::now();
            updated = true;
        }
        Ok(updated)
    }
}

#[async_trait]
impl DisbursementStore for MemoryStore {
    async fn find_disbursement_by_basic_id(
        &self,
        basic_disbursement_id: &str,
    ) -> Result<Option<DisbursementRow>, AppError> {
        Ok(self
            .disbursements
            .read()
            .await
            .iter()
            .find(|row| row.basic_disbursement_id.as_deref() == Some(basic_disbursement_id))
            .cloned())
    }

    async fn insert_disbursement(&self, row: &DisbursementRow) -> Result<(), AppError> {
        self.disbursements.write().await.push(row.clone());
        Ok(())
    }

    async fn update_disbursement_status(
        &self,
        id: Uuid,
        update: &DisbursementStatusUpdate,
    ) -> Result<(), AppError> {
        let mut rows = self.disbursements.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Disbursement {} not found", id)))?;
        update.apply_to(row);
        Ok(())
    }

    async fn query_disbursements(
        &self,
        filter: &DisbursementFilter,
        page: PageRequest,
    ) -> Result<DisbursementPage, AppError> {
        let rows = self.disbursements.read().await;
        let mut matching: Vec<&DisbursementRow> = rows.iter().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));

        let total_count = matching.len() as i64;
        let rows = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();
        Ok(DisbursementPage { rows, total_count })
    }

    async fn all_disbursements(&self) -> Result<Vec<DisbursementRow>, AppError> {
        Ok(self.disbursements.read().await.clone())
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn set_otp(
        &self,
        phone_number: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.otps.insert(
            phone_number.to_string(),
            OtpRecord {
                phone_number: phone_number.to_string(),
                otp: otp.to_string(),
                expires_at,
                is_used: false,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>, AppError> {
        let Some(mut entry) = self.otps.get_mut(phone_number) else {
            return Ok(None);
        };
        if entry.is_used {
            return Ok(None);
        }
        if entry.expires_at <= Utc::now() {
            entry.is_used = true;
            return Ok(None);
        }
        Ok(Some(entry.clone()))
    }

    async fn mark_otp_as_used(&self, phone_number: &str) -> Result<bool, AppError> {
        match self.otps.get_mut(phone_number) {
            Some(mut entry) if !entry.is_used => {
                entry.is_used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let before = self.otps.len();
        self.otps.retain(|_, record| record.expires_at > now);
        Ok((before - self.otps.len()) as u64)
    }
}
