use crate::errors::AppError;
use crate::normalizer::{clean, parse_date};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Accepts strings, numbers and booleans. Analyzer output is not consistently typed.
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

fn loose_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    })
}

fn loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ============ Analyzer Output ============

/// One disbursement as extracted by the content analyzer, before any cleaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDisbursement {
    #[serde(default, deserialize_with = "loose_string")]
    pub banker_email: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub loan_account_number: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub disbursed_on: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub disbursed_created_on: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub sanction_date: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub disbursement_amount: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub loan_sanction_amount: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub bank_app_id: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub basic_app_id: Option<String>,
    #[serde(default, deserialize_with = "loose_string", alias = "basicDisbursementId")]
    pub basic_disb_id: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub app_bank_name: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub disbursement_stage: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub disbursement_status: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub primary_borrower_mobile: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub pdd: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub otc: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub sourcing_channel: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub sourcing_code: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub application_product_type: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub data_found: Option<bool>,
    #[serde(default, deserialize_with = "loose_f64")]
    pub confidence_score: Option<f64>,
    #[serde(default, deserialize_with = "loose_string")]
    pub extraction_method: Option<String>,
    /// Set by the monitor before ingestion; never produced by the analyzer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceTag>,
}

/// Where a live record came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTag {
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub email_date: Option<DateTime<Utc>>,
    pub source_email_id: Option<String>,
    pub processing_type: Option<String>,
}

/// A raw record after placeholder cleaning. Every text field is either a real
/// value or absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisbursementCandidate {
    pub banker_email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub loan_account_number: Option<String>,
    pub disbursed_on: Option<String>,
    pub disbursed_created_on: Option<String>,
    pub sanction_date: Option<String>,
    pub disbursement_amount: Option<String>,
    pub loan_sanction_amount: Option<String>,
    pub bank_app_id: Option<String>,
    pub basic_app_id: Option<String>,
    pub basic_disbursement_id: Option<String>,
    pub app_bank_name: Option<String>,
    pub disbursement_stage: Option<String>,
    pub disbursement_status: Option<String>,
    pub primary_borrower_mobile: Option<String>,
    pub pdd: Option<String>,
    pub otc: Option<String>,
    pub sourcing_channel: Option<String>,
    pub sourcing_code: Option<String>,
    pub application_product_type: Option<String>,
    pub data_found: Option<bool>,
    pub confidence_score: Option<f64>,
    pub extraction_method: Option<String>,
    pub source: SourceTag,
}

impl From<RawDisbursement> for DisbursementCandidate {
    fn from(raw: RawDisbursement) -> Self {
        let source = raw.source.unwrap_or_default();
        Self {
            banker_email: clean(raw.banker_email),
            first_name: clean(raw.first_name),
            last_name: clean(raw.last_name),
            loan_account_number: clean(raw.loan_account_number),
            disbursed_on: clean(raw.disbursed_on),
            disbursed_created_on: clean(raw.disbursed_created_on),
            sanction_date: clean(raw.sanction_date),
            disbursement_amount: clean(raw.disbursement_amount),
            loan_sanction_amount: clean(raw.loan_sanction_amount),
            bank_app_id: clean(raw.bank_app_id),
            basic_app_id: clean(raw.basic_app_id),
            basic_disbursement_id: clean(raw.basic_disb_id),
            app_bank_name: clean(raw.app_bank_name),
            disbursement_stage: clean(raw.disbursement_stage),
            disbursement_status: clean(raw.disbursement_status),
            primary_borrower_mobile: clean(raw.primary_borrower_mobile),
            pdd: clean(raw.pdd),
            otc: clean(raw.otc),
            sourcing_channel: clean(raw.sourcing_channel),
            sourcing_code: clean(raw.sourcing_code),
            application_product_type: clean(raw.application_product_type),
            data_found: raw.data_found,
            confidence_score: raw.confidence_score,
            extraction_method: clean(raw.extraction_method),
            source: SourceTag {
                email_subject: clean(source.email_subject),
                email_sender: clean(source.email_sender),
                email_date: source.email_date,
                source_email_id: clean(source.source_email_id),
                processing_type: clean(source.processing_type),
            },
        }
    }
}

impl DisbursementCandidate {
    /// Short label for logs and report details.
    pub fn label(&self) -> String {
        self.loan_account_number
            .as_deref()
            .or(self.bank_app_id.as_deref())
            .or(self.basic_disbursement_id.as_deref())
            .unwrap_or("N/A")
            .to_string()
    }
}

// ============ Disbursement Storage ============

/// Canonical row of the `disbursements` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DisbursementRow {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub banker_email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub loan_account_number: Option<String>,
    #[schema(value_type = Option<String>)]
    pub disbursed_on: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub disbursed_created_on: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub sanction_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub disbursement_amount: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub loan_sanction_amount: Option<BigDecimal>,
    pub bank_app_id: Option<String>,
    pub basic_app_id: Option<String>,
    /// Deduplication key.
    pub basic_disbursement_id: Option<String>,
    pub app_bank_name: Option<String>,
    pub disbursement_stage: Option<String>,
    pub disbursement_status: Option<String>,
    pub primary_borrower_mobile: Option<String>,
    pub pdd: Option<String>,
    pub otc: Option<String>,
    pub sourcing_channel: Option<String>,
    pub sourcing_code: Option<String>,
    pub application_product_type: Option<String>,
    pub data_found: bool,
    pub confidence_score: f64,
    pub extraction_method: String,
    pub manual_review_required: bool,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    #[schema(value_type = Option<String>)]
    pub email_date: Option<DateTime<Utc>>,
    pub source_email_id: Option<String>,
    pub processing_type: Option<String>,
    pub created_by: String,
    #[schema(value_type = String)]
    pub processed_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl DisbursementRow {
    pub fn customer_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Fields that a later sighting of an already stored disbursement may change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisbursementStatusUpdate {
    pub disbursement_status: Option<String>,
    pub pdd: Option<String>,
    pub otc: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DisbursementStatusUpdate {
    /// Applies the update: present values overwrite, absent ones keep the row's value.
    pub fn apply_to(&self, row: &mut DisbursementRow) {
        if let Some(status) = &self.disbursement_status {
            row.disbursement_status = Some(status.clone());
        }
        if let Some(pdd) = &self.pdd {
            row.pdd = Some(pdd.clone());
        }
        if let Some(otc) = &self.otc {
            row.otc = Some(otc.clone());
        }
        row.updated_at = self.updated_at;
    }
}

// ============ Ingestion Report ============

/// Per-batch ingestion statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IngestionReport {
    pub total_processed: usize,
    pub new_records: usize,
    pub updated_records: usize,
    pub validation_failed: usize,
    pub errors: usize,
    /// One human-readable line per record.
    pub details: Vec<String>,
}

impl IngestionReport {
    pub fn saved(&self) -> usize {
        self.new_records + self.updated_records
    }

    pub fn merge(&mut self, other: IngestionReport) {
        self.total_processed += other.total_processed;
        self.new_records += other.new_records;
        self.updated_records += other.updated_records;
        self.validation_failed += other.validation_failed;
        self.errors += other.errors;
        self.details.extend(other.details);
    }
}

// ============ Queries ============

/// Query string of `GET /disbursements`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(default)]
pub struct DisbursementQuery {
    /// Case-insensitive substring of the bank name.
    pub bank_name: Option<String>,
    pub disbursement_stage: Option<String>,
    /// `YYYY-MM-DD`, inclusive, on `disbursed_on`.
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`, inclusive, on `disbursed_on`.
    pub date_to: Option<String>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    /// Substring of the first or last name.
    pub customer_name: Option<String>,
    /// 1..=1000, default 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Validated filter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisbursementFilter {
    pub bank_name: Option<String>,
    pub disbursement_stage: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub amount_min: Option<BigDecimal>,
    pub amount_max: Option<BigDecimal>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

fn query_date(name: &str, value: Option<String>) -> Result<Option<NaiveDate>, AppError> {
    match clean(value) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::Validation(format!("{} must be a date in YYYY-MM-DD format", name))),
    }
}

fn query_amount(value: Option<f64>) -> Option<BigDecimal> {
    value.and_then(crate::normalizer::decimal_from_f64)
}

impl DisbursementQuery {
    pub fn into_parts(self) -> Result<(DisbursementFilter, PageRequest), AppError> {
        let limit = self.limit.unwrap_or(100);
        if !(1..=1000).contains(&limit) {
            return Err(AppError::Validation(
                "limit must be between 1 and 1000".to_string(),
            ));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::Validation(
                "offset must be greater than or equal to 0".to_string(),
            ));
        }

        let filter = DisbursementFilter {
            bank_name: clean(self.bank_name),
            disbursement_stage: clean(self.disbursement_stage),
            date_from: query_date("date_from", self.date_from)?,
            date_to: query_date("date_to", self.date_to)?,
            amount_min: query_amount(self.amount_min),
            amount_max: query_amount(self.amount_max),
            customer_name: clean(self.customer_name),
        };
        Ok((filter, PageRequest { limit, offset }))
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

impl DisbursementFilter {
    /// In-process evaluation of the filter; the SQL store builds the same
    /// predicates in its query.
    pub fn matches(&self, row: &DisbursementRow) -> bool {
        if let Some(bank) = &self.bank_name {
            if !contains_ci(row.app_bank_name.as_deref(), bank) {
                return false;
            }
        }
        if let Some(stage) = &self.disbursement_stage {
            if row.disbursement_stage.as_deref() != Some(stage.as_str()) {
                return false;
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(date) = row.disbursed_on else {
                return false;
            };
            if self.date_from.is_some_and(|from| date < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| date > to) {
                return false;
            }
        }
        if self.amount_min.is_some() || self.amount_max.is_some() {
            let Some(amount) = &row.disbursement_amount else {
                return false;
            };
            if self.amount_min.as_ref().is_some_and(|min| amount < min) {
                return false;
            }
            if self.amount_max.as_ref().is_some_and(|max| amount > max) {
                return false;
            }
        }
        if let Some(name) = &self.customer_name {
            if !contains_ci(row.first_name.as_deref(), name)
                && !contains_ci(row.last_name.as_deref(), name)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PageInfo {
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
    pub current_page: i64,
    pub total_pages: i64,
}

impl PageInfo {
    pub fn new(page: PageRequest, total_count: i64) -> Self {
        let total_pages = if total_count == 0 {
            0
        } else {
            (total_count + page.limit - 1) / page.limit
        };
        Self {
            limit: page.limit,
            offset: page.offset,
            has_more: page.offset + page.limit < total_count,
            current_page: page.offset / page.limit + 1,
            total_pages,
        }
    }
}

/// One page of rows plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq)]
pub struct DisbursementPage {
    pub rows: Vec<DisbursementRow>,
    pub total_count: i64,
}

// ============ Statistics ============

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatsOverview {
    pub total_disbursements: usize,
    #[schema(value_type = String)]
    pub total_amount: BigDecimal,
    #[schema(value_type = String)]
    pub average_amount: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BankStats {
    pub count: usize,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct RecentActivity {
    pub today: usize,
    pub this_week: usize,
    pub this_month: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DisbursementStats {
    pub overview: StatsOverview,
    pub by_bank: BTreeMap<String, BankStats>,
    pub by_stage: BTreeMap<String, usize>,
    pub recent_activity: RecentActivity,
    #[schema(value_type = String)]
    pub last_updated: DateTime<Utc>,
}

impl DisbursementStats {
    /// Aggregates over every stored row. Recent activity counts by `disbursed_on`
    /// relative to `now`.
    pub fn from_rows(rows: &[DisbursementRow], now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let week_ago = today - Duration::days(7);
        let month_ago = today - Duration::days(30);

        let mut total_amount = BigDecimal::zero();
        let mut by_bank: BTreeMap<String, BankStats> = BTreeMap::new();
        let mut by_stage: BTreeMap<String, usize> = BTreeMap::new();
        let mut recent = RecentActivity::default();

        for row in rows {
            if let Some(amount) = row.disbursement_amount.as_ref().filter(|a| !a.is_zero()) {
                total_amount += amount;
                let bank = row.app_bank_name.clone().unwrap_or_else(|| "Unknown".to_string());
                let entry = by_bank.entry(bank).or_insert_with(|| BankStats {
                    count: 0,
                    amount: BigDecimal::zero(),
                });
                entry.count += 1;
                entry.amount += amount;
            }

            let stage = row
                .disbursement_stage
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            *by_stage.entry(stage).or_insert(0) += 1;

            if let Some(date) = row.disbursed_on {
                if date == today {
                    recent.today += 1;
                }
                if date >= week_ago {
                    recent.this_week += 1;
                }
                if date >= month_ago {
                    recent.this_month += 1;
                }
            }
        }

        let average_amount = if rows.is_empty() {
            BigDecimal::zero()
        } else {
            (&total_amount / BigDecimal::from(rows.len() as i64)).round(2)
        };

        Self {
            overview: StatsOverview {
                total_disbursements: rows.len(),
                total_amount,
                average_amount,
            },
            by_bank,
            by_stage,
            recent_activity: recent,
            last_updated: now,
        }
    }
}

/// Parses a candidate date field, used for `disbursed_on` and friends.
pub fn candidate_date(value: &Option<String>) -> Option<NaiveDate> {
    value.as_deref().and_then(parse_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    pub(crate) fn row(amount: &str, bank: &str, disbursed_on: Option<NaiveDate>) -> DisbursementRow {
        let now = Utc::now();
        DisbursementRow {
            id: Uuid::new_v4(),
            banker_email: None,
            first_name: Some("Ravi".into()),
            last_name: Some("Kumar".into()),
            loan_account_number: Some("LAN1".into()),
            disbursed_on,
            disbursed_created_on: None,
            sanction_date: None,
            disbursement_amount: BigDecimal::from_str(amount).ok(),
            loan_sanction_amount: None,
            bank_app_id: None,
            basic_app_id: None,
            basic_disbursement_id: None,
            app_bank_name: Some(bank.into()),
            disbursement_stage: Some("Disbursed".into()),
            disbursement_status: Some("VerifiedByAI".into()),
            primary_borrower_mobile: None,
            pdd: None,
            otc: None,
            sourcing_channel: None,
            sourcing_code: None,
            application_product_type: None,
            data_found: true,
            confidence_score: 0.0,
            extraction_method: "AI".into(),
            manual_review_required: true,
            email_subject: None,
            email_sender: None,
            email_date: None,
            source_email_id: None,
            processing_type: None,
            created_by: "system".into(),
            processed_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn raw_records_accept_loose_types() {
        let raw: RawDisbursement = serde_json::from_value(json!({
            "loanAccountNumber": 12345,
            "disbursementAmount": 250000.5,
            "basicDisbursementId": "D-1",
            "dataFound": "true",
            "confidenceScore": "0.92",
            "pdd": null
        }))
        .unwrap();
        assert_eq!(raw.loan_account_number.as_deref(), Some("12345"));
        assert_eq!(raw.disbursement_amount.as_deref(), Some("250000.5"));
        assert_eq!(raw.basic_disb_id.as_deref(), Some("D-1"));
        assert_eq!(raw.data_found, Some(true));
        assert_eq!(raw.confidence_score, Some(0.92));
        assert_eq!(raw.pdd, None);
    }

    #[test]
    fn candidate_drops_placeholders() {
        let raw = RawDisbursement {
            loan_account_number: Some("Not found".into()),
            bank_app_id: Some(" BA-9 ".into()),
            basic_disb_id: Some("N/A".into()),
            ..Default::default()
        };
        let candidate = DisbursementCandidate::from(raw);
        assert_eq!(candidate.loan_account_number, None);
        assert_eq!(candidate.bank_app_id.as_deref(), Some("BA-9"));
        assert_eq!(candidate.basic_disbursement_id, None);
        assert_eq!(candidate.label(), "BA-9");
    }

    #[test]
    fn query_limits_are_validated() {
        let query = DisbursementQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert!(query.into_parts().unwrap_err().is_validation());

        let query = DisbursementQuery {
            date_from: Some("01/02/2024".into()),
            ..Default::default()
        };
        assert!(query.into_parts().unwrap_err().is_validation());

        let (_, page) = DisbursementQuery::default().into_parts().unwrap();
        assert_eq!(page, PageRequest { limit: 100, offset: 0 });
    }

    #[test]
    fn filter_matches_bank_dates_and_names() {
        let d = NaiveDate::from_ymd_opt(2024, 5, 10);
        let r = row("500000", "HDFC Bank", d);

        let filter = DisbursementFilter {
            bank_name: Some("hdfc".into()),
            date_from: NaiveDate::from_ymd_opt(2024, 5, 1),
            date_to: NaiveDate::from_ymd_opt(2024, 5, 31),
            amount_min: Some(BigDecimal::from(100000)),
            customer_name: Some("kum".into()),
            ..Default::default()
        };
        assert!(filter.matches(&r));

        let filter = DisbursementFilter {
            amount_max: Some(BigDecimal::from(1000)),
            ..Default::default()
        };
        assert!(!filter.matches(&r));

        let filter = DisbursementFilter {
            bank_name: Some("icici".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&r));
    }

    #[test]
    fn page_info_counts_pages() {
        let info = PageInfo::new(PageRequest { limit: 10, offset: 20 }, 35);
        assert_eq!(info.current_page, 3);
        assert_eq!(info.total_pages, 4);
        assert!(info.has_more);

        let info = PageInfo::new(PageRequest { limit: 10, offset: 30 }, 35);
        assert!(!info.has_more);
    }

    #[test]
    fn stats_aggregate_by_bank_stage_and_recency() {
        let now = Utc::now();
        let today = now.date_naive();
        let rows = vec![
            row("100000", "HDFC", Some(today)),
            row("300000", "HDFC", Some(today - Duration::days(10))),
            row("200000", "SBI", None),
        ];
        let stats = DisbursementStats::from_rows(&rows, now);
        assert_eq!(stats.overview.total_disbursements, 3);
        assert_eq!(stats.overview.total_amount, BigDecimal::from(600000));
        assert_eq!(stats.overview.average_amount, BigDecimal::from(200000).round(2));
        assert_eq!(stats.by_bank["HDFC"].count, 2);
        assert_eq!(stats.by_stage["Disbursed"], 3);
        assert_eq!(stats.recent_activity.today, 1);
        assert_eq!(stats.recent_activity.this_week, 1);
        assert_eq!(stats.recent_activity.this_month, 2);
    }

    #[test]
    fn status_update_keeps_absent_fields() {
        let mut r = row("1", "HDFC", None);
        r.pdd = Some("Pending".into());
        let update = DisbursementStatusUpdate {
            disbursement_status: Some("Closed".into()),
            pdd: None,
            otc: Some("Cleared".into()),
            updated_at: Utc::now(),
        };
        update.apply_to(&mut r);
        assert_eq!(r.disbursement_status.as_deref(), Some("Closed"));
        assert_eq!(r.pdd.as_deref(), Some("Pending"));
        assert_eq!(r.otc.as_deref(), Some("Cleared"));
    }
}
