//! Disbursement ingestion: validate, deduplicate, normalize and persist analyzer
//! output one record at a time.

use crate::disbursement_models::{
    candidate_date, DisbursementCandidate, DisbursementRow, DisbursementStatusUpdate,
    IngestionReport,
};
use crate::errors::AppError;
use crate::normalizer::parse_amount;
use crate::store::DisbursementStore;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const DEFAULT_DISBURSEMENT_STATUS: &str = "VerifiedByAI";
pub const DEFAULT_EXTRACTION_METHOD: &str = "AI";
pub const SYSTEM_USER: &str = "system";

/// Why a candidate was not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingIdentity,
    InvalidAmount(Option<String>),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingIdentity => {
                f.write_str("no loan account number, bank app id or disbursement id")
            }
            Rejection::InvalidAmount(Some(raw)) => write!(f, "invalid disbursement amount '{}'", raw),
            Rejection::InvalidAmount(None) => f.write_str("missing disbursement amount"),
        }
    }
}

/// Checks the identity and amount rules and returns the parsed amount.
pub fn validate_candidate(candidate: &DisbursementCandidate) -> Result<BigDecimal, Rejection> {
    let has_identity = candidate.loan_account_number.is_some()
        || candidate.bank_app_id.is_some()
        || candidate.basic_disbursement_id.is_some();
    if !has_identity {
        return Err(Rejection::MissingIdentity);
    }

    let raw = candidate.disbursement_amount.as_deref();
    match raw.and_then(parse_amount) {
        Some(amount) if amount > BigDecimal::zero() => Ok(amount),
        _ => Err(Rejection::InvalidAmount(raw.map(str::to_string))),
    }
}

/// Builds a fresh row for a brand-new disbursement.
pub fn normalize_candidate(
    candidate: DisbursementCandidate,
    amount: BigDecimal,
    now: DateTime<Utc>,
) -> DisbursementRow {
    DisbursementRow {
        id: Uuid::new_v4(),
        disbursed_on: candidate_date(&candidate.disbursed_on),
        disbursed_created_on: candidate_date(&candidate.disbursed_created_on),
        sanction_date: candidate_date(&candidate.sanction_date),
        disbursement_amount: Some(amount),
        loan_sanction_amount: candidate.loan_sanction_amount.as_deref().and_then(parse_amount),
        banker_email: candidate.banker_email,
        first_name: candidate.first_name,
        last_name: candidate.last_name,
        loan_account_number: candidate.loan_account_number,
        bank_app_id: candidate.bank_app_id,
        basic_app_id: candidate.basic_app_id,
        basic_disbursement_id: candidate.basic_disbursement_id,
        app_bank_name: candidate.app_bank_name,
        disbursement_stage: candidate.disbursement_stage,
        disbursement_status: Some(
            candidate
                .disbursement_status
                .unwrap_or_else(|| DEFAULT_DISBURSEMENT_STATUS.to_string()),
        ),
        primary_borrower_mobile: candidate.primary_borrower_mobile,
        pdd: candidate.pdd,
        otc: candidate.otc,
        sourcing_channel: candidate.sourcing_channel,
        sourcing_code: candidate.sourcing_code,
        application_product_type: candidate.application_product_type,
        data_found: candidate.data_found.unwrap_or(true),
        confidence_score: candidate.confidence_score.unwrap_or(0.0),
        extraction_method: candidate
            .extraction_method
            .unwrap_or_else(|| DEFAULT_EXTRACTION_METHOD.to_string()),
        manual_review_required: true,
        email_subject: candidate.source.email_subject,
        email_sender: candidate.source.email_sender,
        email_date: candidate.source.email_date,
        source_email_id: candidate.source.source_email_id,
        processing_type: candidate.source.processing_type,
        created_by: SYSTEM_USER.to_string(),
        processed_at: now,
        created_at: now,
        updated_at: now,
    }
}

enum Saved {
    Inserted(DisbursementRow),
    Updated(DisbursementRow),
}

async fn save_one(
    store: &dyn DisbursementStore,
    candidate: DisbursementCandidate,
    amount: BigDecimal,
) -> Result<Saved, AppError> {
    let now = Utc::now();

    if let Some(basic_id) = candidate.basic_disbursement_id.as_deref() {
        if let Some(mut existing) = store.find_disbursement_by_basic_id(basic_id).await? {
            let update = DisbursementStatusUpdate {
                disbursement_status: candidate.disbursement_status.clone(),
                pdd: candidate.pdd.clone(),
                otc: candidate.otc.clone(),
                updated_at: now,
            };
            store.update_disbursement_status(existing.id, &update).await?;
            update.apply_to(&mut existing);
            return Ok(Saved::Updated(existing));
        }
    }

    let row = normalize_candidate(candidate, amount, now);
    if let Err(e) = store.insert_disbursement(&row).await {
        tracing::error!("❌ Failed to insert disbursement {:?}: {}", row, e);
        return Err(e);
    }
    Ok(Saved::Inserted(row))
}

/// Result of one ingestion batch.
#[derive(Debug, Default)]
pub struct IngestionOutcome {
    pub report: IngestionReport,
    /// Rows inserted or updated, in input order.
    pub saved: Vec<DisbursementRow>,
}

/// Ingests a batch. Records are independent: a failing record is counted and the
/// rest of the batch still runs.
pub async fn ingest(
    store: &dyn DisbursementStore,
    candidates: Vec<DisbursementCandidate>,
) -> IngestionOutcome {
    let mut outcome = IngestionOutcome::default();

    for candidate in candidates {
        outcome.report.total_processed += 1;
        let label = candidate.label();

        let amount = match validate_candidate(&candidate) {
            Ok(amount) => amount,
            Err(rejection) => {
                tracing::warn!("Disbursement {} failed validation: {}", label, rejection);
                outcome.report.validation_failed += 1;
                outcome
                    .report
                    .details
                    .push(format!("Validation failed for {}: {}", label, rejection));
                continue;
            }
        };

        match save_one(store, candidate, amount).await {
            Ok(Saved::Inserted(row)) => {
                outcome.report.new_records += 1;
                outcome.report.details.push(format!(
                    "New disbursement saved: {} - {}",
                    label,
                    row.customer_name()
                ));
                outcome.saved.push(row);
            }
            Ok(Saved::Updated(row)) => {
                outcome.report.updated_records += 1;
                outcome.report.details.push(format!(
                    "Updated disbursement: {} - {}",
                    label,
                    row.disbursement_status.as_deref().unwrap_or("N/A")
                ));
                outcome.saved.push(row);
            }
            Err(e) => {
                outcome.report.errors += 1;
                outcome
                    .report
                    .details
                    .push(format!("Error saving disbursement {}: {}", label, e));
            }
        }
    }

    tracing::info!(
        "✓ Disbursement batch: {} processed, {} new, {} updated, {} invalid, {} errors",
        outcome.report.total_processed,
        outcome.report.new_records,
        outcome.report.updated_records,
        outcome.report.validation_failed,
        outcome.report.errors
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::str::FromStr;

    fn candidate(amount: &str) -> DisbursementCandidate {
        DisbursementCandidate {
            loan_account_number: Some("LAN-7".into()),
            first_name: Some("Meera".into()),
            disbursement_amount: Some(amount.into()),
            disbursed_on: Some("05-02-2024".into()),
            ..Default::default()
        }
    }

    #[test]
    fn zero_amount_is_rejected() {
        assert!(matches!(
            validate_candidate(&candidate("₹0")),
            Err(Rejection::InvalidAmount(_))
        ));
    }

    #[test]
    fn indian_grouping_is_accepted() {
        let amount = validate_candidate(&candidate("1,00,000.50")).unwrap();
        assert_eq!(amount, BigDecimal::from_str("100000.50").unwrap());
    }

    #[test]
    fn identity_is_required_regardless_of_amount() {
        let mut c = candidate("5000000");
        c.loan_account_number = None;
        assert_eq!(validate_candidate(&c), Err(Rejection::MissingIdentity));
    }

    #[test]
    fn new_rows_get_defaults() {
        let row = normalize_candidate(
            candidate("250000"),
            BigDecimal::from(250000),
            Utc::now(),
        );
        assert_eq!(row.disbursement_status.as_deref(), Some("VerifiedByAI"));
        assert_eq!(row.extraction_method, "AI");
        assert_eq!(row.created_by, "system");
        assert!(row.data_found);
        assert!(row.manual_review_required);
        assert_eq!(row.confidence_score, 0.0);
        assert_eq!(
            row.disbursed_on,
            chrono::NaiveDate::from_ymd_opt(2024, 2, 5)
        );
    }

    #[tokio::test]
    async fn same_disbursement_id_updates_status_only() {
        let store = MemoryStore::new();

        let mut first = candidate("300000");
        first.basic_disbursement_id = Some("BD-1".into());
        first.disbursement_status = Some("Pending".into());
        let report = ingest(&store, vec![first]).await.report;
        assert_eq!(report.new_records, 1);

        let mut second = candidate("999999");
        second.basic_disbursement_id = Some("BD-1".into());
        second.disbursement_status = Some("Disbursed".into());
        second.first_name = Some("Changed".into());
        let outcome = ingest(&store, vec![second]).await;
        assert_eq!(outcome.report.updated_records, 1);
        assert_eq!(store.disbursement_count().await, 1);

        let stored = store.find_disbursement_by_basic_id("BD-1").await.unwrap().unwrap();
        assert_eq!(stored.disbursement_status.as_deref(), Some("Disbursed"));
        assert_eq!(stored.first_name.as_deref(), Some("Meera"));
        assert_eq!(
            stored.disbursement_amount,
            Some(BigDecimal::from(300000))
        );
    }

    #[tokio::test]
    async fn batch_counts_every_outcome() {
        let store = MemoryStore::new();
        let mut no_identity = candidate("100");
        no_identity.loan_account_number = None;
        let outcome = ingest(
            &store,
            vec![candidate("1,500"), no_identity, candidate("n/a")],
        )
        .await;
        assert_eq!(outcome.report.total_processed, 3);
        assert_eq!(outcome.report.new_records, 1);
        assert_eq!(outcome.report.validation_failed, 2);
        assert_eq!(outcome.report.details.len(), 3);
        assert_eq!(outcome.saved.len(), 1);
    }
}
