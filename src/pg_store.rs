//! PostgreSQL implementation of the lead, disbursement and OTP stores.

use crate::disbursement_models::{
    DisbursementFilter, DisbursementPage, DisbursementRow, DisbursementStatusUpdate, PageRequest,
};
use crate::errors::{AppError, ResultExt};
use crate::models::{Environment, InternalStatus, LeadRow, OtpRecord, ProcessingStage};
use crate::store::{DisbursementStore, LeadStore, OtpStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const LEAD_COLUMNS: [&str; 39] = [
    "id",
    "api_id",
    "basic_app_id",
    "reference_id",
    "environment",
    "source_endpoint",
    "processing_stage",
    "internal_status",
    "application_status",
    "assigned_to_rm",
    "customer_first_name",
    "customer_last_name",
    "customer_mobile",
    "customer_email",
    "customer_pan",
    "customer_dob",
    "customer_gender",
    "customer_pincode",
    "customer_city",
    "customer_district",
    "customer_state",
    "loan_type",
    "loan_amount_req",
    "loan_tenure",
    "annual_income",
    "credit_score",
    "profession_name",
    "company_name",
    "property_type_id",
    "property_value",
    "property_city",
    "property_pincode",
    "property_project_name",
    "error_message",
    "original_request_data",
    "fbb_api_response",
    "self_fullfilment_api_response",
    "created_at",
    "updated_at",
];

const DISBURSEMENT_COLUMNS: [&str; 35] = [
    "id",
    "banker_email",
    "first_name",
    "last_name",
    "loan_account_number",
    "disbursed_on",
    "disbursed_created_on",
    "sanction_date",
    "disbursement_amount",
    "loan_sanction_amount",
    "bank_app_id",
    "basic_app_id",
    "basic_disbursement_id",
    "app_bank_name",
    "disbursement_stage",
    "disbursement_status",
    "primary_borrower_mobile",
    "pdd",
    "otc",
    "sourcing_channel",
    "sourcing_code",
    "application_product_type",
    "data_found",
    "confidence_score",
    "extraction_method",
    "manual_review_required",
    "email_subject",
    "email_sender",
    "email_date",
    "source_email_id",
    "processing_type",
    "created_by",
    "processed_at",
    "created_at",
    "updated_at",
];

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    )
}

/// `UPDATE .. SET` over every column but the first, keyed by the first (`id`).
fn update_sql(table: &str, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, column)| format!("{} = ${}", column, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {} SET {} WHERE id = $1", table, assignments)
}

fn select_sql(table: &str, columns: &[&str]) -> String {
    format!("SELECT {} FROM {}", columns.join(", "), table)
}

/// Binds a lead in `LEAD_COLUMNS` order.
fn bind_lead<'q>(
    query: Query<'q, Postgres, PgArguments>,
    row: &'q LeadRow,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(row.id)
        .bind(&row.api_id)
        .bind(&row.basic_app_id)
        .bind(&row.reference_id)
        .bind(row.environment.as_str())
        .bind(&row.source_endpoint)
        .bind(row.processing_stage.as_str())
        .bind(row.internal_status.as_str())
        .bind(&row.application_status)
        .bind(&row.assigned_to_rm)
        .bind(&row.customer_first_name)
        .bind(&row.customer_last_name)
        .bind(&row.customer_mobile)
        .bind(&row.customer_email)
        .bind(&row.customer_pan)
        .bind(row.customer_dob)
        .bind(&row.customer_gender)
        .bind(&row.customer_pincode)
        .bind(&row.customer_city)
        .bind(&row.customer_district)
        .bind(&row.customer_state)
        .bind(&row.loan_type)
        .bind(&row.loan_amount_req)
        .bind(row.loan_tenure)
        .bind(&row.annual_income)
        .bind(row.credit_score)
        .bind(&row.profession_name)
        .bind(&row.company_name)
        .bind(&row.property_type_id)
        .bind(&row.property_value)
        .bind(&row.property_city)
        .bind(&row.property_pincode)
        .bind(&row.property_project_name)
        .bind(&row.error_message)
        .bind(&row.original_request_data)
        .bind(&row.fbb_api_response)
        .bind(&row.self_fullfilment_api_response)
        .bind(row.created_at)
        .bind(row.updated_at)
}

/// Binds a disbursement in `DISBURSEMENT_COLUMNS` order.
fn bind_disbursement<'q>(
    query: Query<'q, Postgres, PgArguments>,
    row: &'q DisbursementRow,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(row.id)
        .bind(&row.banker_email)
        .bind(&row.first_name)
        .bind(&row.last_name)
        .bind(&row.loan_account_number)
        .bind(row.disbursed_on)
        .bind(row.disbursed_created_on)
        .bind(row.sanction_date)
        .bind(&row.disbursement_amount)
        .bind(&row.loan_sanction_amount)
        .bind(&row.bank_app_id)
        .bind(&row.basic_app_id)
        .bind(&row.basic_disbursement_id)
        .bind(&row.app_bank_name)
        .bind(&row.disbursement_stage)
        .bind(&row.disbursement_status)
        .bind(&row.primary_borrower_mobile)
        .bind(&row.pdd)
        .bind(&row.otc)
        .bind(&row.sourcing_channel)
        .bind(&row.sourcing_code)
        .bind(&row.application_product_type)
        .bind(row.data_found)
        .bind(row.confidence_score)
        .bind(&row.extraction_method)
        .bind(row.manual_review_required)
        .bind(&row.email_subject)
        .bind(&row.email_sender)
        .bind(row.email_date)
        .bind(&row.source_email_id)
        .bind(&row.processing_type)
        .bind(&row.created_by)
        .bind(row.processed_at)
        .bind(row.created_at)
        .bind(row.updated_at)
}

fn lead_from_row(row: &PgRow) -> Result<LeadRow, sqlx::Error> {
    let environment: String = row.try_get("environment")?;
    let stage: Option<String> = row.try_get("processing_stage")?;
    let status: Option<String> = row.try_get("internal_status")?;

    Ok(LeadRow {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        basic_app_id: row.try_get("basic_app_id")?,
        reference_id: row.try_get("reference_id")?,
        environment: Environment::parse_stored(&environment).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown environment '{}'", environment).into())
        })?,
        source_endpoint: row.try_get("source_endpoint")?,
        processing_stage: stage
            .as_deref()
            .map(ProcessingStage::parse_stored)
            .unwrap_or_default(),
        internal_status: status
            .as_deref()
            .and_then(InternalStatus::parse_stored)
            .unwrap_or(InternalStatus::Failed),
        application_status: row.try_get("application_status")?,
        assigned_to_rm: row.try_get("assigned_to_rm")?,
        customer_first_name: row.try_get("customer_first_name")?,
        customer_last_name: row.try_get("customer_last_name")?,
        customer_mobile: row.try_get("customer_mobile")?,
        customer_email: row.try_get("customer_email")?,
        customer_pan: row.try_get("customer_pan")?,
        customer_dob: row.try_get("customer_dob")?,
        customer_gender: row.try_get("customer_gender")?,
        customer_pincode: row.try_get("customer_pincode")?,
        customer_city: row.try_get("customer_city")?,
        customer_district: row.try_get("customer_district")?,
        customer_state: row.try_get("customer_state")?,
        loan_type: row.try_get("loan_type")?,
        loan_amount_req: row.try_get("loan_amount_req")?,
        loan_tenure: row.try_get("loan_tenure")?,
        annual_income: row.try_get("annual_income")?,
        credit_score: row.try_get("credit_score")?,
        profession_name: row.try_get("profession_name")?,
        company_name: row.try_get("company_name")?,
        property_type_id: row.try_get("property_type_id")?,
        property_value: row.try_get("property_value")?,
        property_city: row.try_get("property_city")?,
        property_pincode: row.try_get("property_pincode")?,
        property_project_name: row.try_get("property_project_name")?,
        error_message: row.try_get("error_message")?,
        original_request_data: row.try_get("original_request_data")?,
        fbb_api_response: row.try_get("fbb_api_response")?,
        self_fullfilment_api_response: row.try_get("self_fullfilment_api_response")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn disbursement_from_row(row: &PgRow) -> Result<DisbursementRow, sqlx::Error> {
    Ok(DisbursementRow {
        id: row.try_get("id")?,
        banker_email: row.try_get("banker_email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        loan_account_number: row.try_get("loan_account_number")?,
        disbursed_on: row.try_get("disbursed_on")?,
        disbursed_created_on: row.try_get("disbursed_created_on")?,
        sanction_date: row.try_get("sanction_date")?,
        disbursement_amount: row.try_get("disbursement_amount")?,
        loan_sanction_amount: row.try_get("loan_sanction_amount")?,
        bank_app_id: row.try_get("bank_app_id")?,
        basic_app_id: row.try_get("basic_app_id")?,
        basic_disbursement_id: row.try_get("basic_disbursement_id")?,
        app_bank_name: row.try_get("app_bank_name")?,
        disbursement_stage: row.try_get("disbursement_stage")?,
        disbursement_status: row.try_get("disbursement_status")?,
        primary_borrower_mobile: row.try_get("primary_borrower_mobile")?,
        pdd: row.try_get("pdd")?,
        otc: row.try_get("otc")?,
        sourcing_channel: row.try_get("sourcing_channel")?,
        sourcing_code: row.try_get("sourcing_code")?,
        application_product_type: row.try_get("application_product_type")?,
        data_found: row.try_get("data_found")?,
        confidence_score: row.try_get("confidence_score")?,
        extraction_method: row.try_get("extraction_method")?,
        manual_review_required: row.try_get("manual_review_required")?,
        email_subject: row.try_get("email_subject")?,
        email_sender: row.try_get("email_sender")?,
        email_date: row.try_get("email_date")?,
        source_email_id: row.try_get("source_email_id")?,
        processing_type: row.try_get("processing_type")?,
        created_by: row.try_get("created_by")?,
        processed_at: row.try_get("processed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_disbursement_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DisbursementFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(bank) = &filter.bank_name {
        builder
            .push(" AND app_bank_name ILIKE ")
            .push_bind(format!("%{}%", bank));
    }
    if let Some(stage) = &filter.disbursement_stage {
        builder.push(" AND disbursement_stage = ").push_bind(stage.clone());
    }
    if let Some(from) = filter.date_from {
        builder.push(" AND disbursed_on >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        builder.push(" AND disbursed_on <= ").push_bind(to);
    }
    if let Some(min) = &filter.amount_min {
        builder.push(" AND disbursement_amount >= ").push_bind(min.clone());
    }
    if let Some(max) = &filter.amount_max {
        builder.push(" AND disbursement_amount <= ").push_bind(max.clone());
    }
    if let Some(name) = &filter.customer_name {
        let pattern = format!("%{}%", name);
        builder
            .push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Store over one environment's connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_lead_where(&self, column: &str, value: &str) -> Result<Option<LeadRow>, AppError> {
        let sql = format!(
            "{} WHERE {} = $1 ORDER BY updated_at DESC LIMIT 1",
            select_sql("leads", &LEAD_COLUMNS),
            column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up lead by {}", column))?;
        row.as_ref()
            .map(lead_from_row)
            .transpose()
            .context("Failed to decode lead row")
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn find_lead_by_api_id(&self, api_id: &str) -> Result<Option<LeadRow>, AppError> {
        self.find_lead_where("api_id", api_id).await
    }

    async fn find_lead_by_basic_app_id(
        &self,
        basic_app_id: &str,
    ) -> Result<Option<LeadRow>, AppError> {
        self.find_lead_where("basic_app_id", basic_app_id).await
    }

    async fn find_lead_by_mobile(&self, mobile: &str) -> Result<Option<LeadRow>, AppError> {
        self.find_lead_where("customer_mobile", mobile).await
    }

    async fn insert_lead(&self, row: &LeadRow) -> Result<(), AppError> {
        let sql = insert_sql("leads", &LEAD_COLUMNS);
        bind_lead(sqlx::query(&sql), row)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert lead {}", row.id))?;
        Ok(())
    }

    async fn update_lead(&self, row: &LeadRow) -> Result<(), AppError> {
        let sql = update_sql("leads", &LEAD_COLUMNS);
        let result = bind_lead(sqlx::query(&sql), row)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update lead {}", row.id))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Lead {} not found", row.id)));
        }
        Ok(())
    }

    async fn update_application_status(
        &self,
        basic_app_id: &str,
        status: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE leads SET application_status = $2, updated_at = now() WHERE basic_app_id = $1",
        )
        .bind(basic_app_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .context("Failed to update lead application status")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DisbursementStore for PgStore {
    async fn find_disbursement_by_basic_id(
        &self,
        basic_disbursement_id: &str,
    ) -> Result<Option<DisbursementRow>, AppError> {
        let sql = format!(
            "{} WHERE basic_disbursement_id = $1 LIMIT 1",
            select_sql("disbursements", &DISBURSEMENT_COLUMNS)
        );
        let row = sqlx::query(&sql)
            .bind(basic_disbursement_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up disbursement")?;
        row.as_ref()
            .map(disbursement_from_row)
            .transpose()
            .context("Failed to decode disbursement row")
    }

    async fn insert_disbursement(&self, row: &DisbursementRow) -> Result<(), AppError> {
        let sql = insert_sql("disbursements", &DISBURSEMENT_COLUMNS);
        bind_disbursement(sqlx::query(&sql), row)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert disbursement {}", row.id))?;
        Ok(())
    }

    async fn update_disbursement_status(
        &self,
        id: Uuid,
        update: &DisbursementStatusUpdate,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE disbursements
            SET disbursement_status = COALESCE($2, disbursement_status),
                pdd = COALESCE($3, pdd),
                otc = COALESCE($4, otc),
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.disbursement_status)
        .bind(&update.pdd)
        .bind(&update.otc)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update disbursement {}", id))?;
        Ok(())
    }

    async fn query_disbursements(
        &self,
        filter: &DisbursementFilter,
        page: PageRequest,
    ) -> Result<DisbursementPage, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM disbursements");
        push_disbursement_filter(&mut count, filter);
        let total_count: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .context("Failed to count disbursements")?;

        let mut select = QueryBuilder::<Postgres>::new(select_sql(
            "disbursements",
            &DISBURSEMENT_COLUMNS,
        ));
        push_disbursement_filter(&mut select, filter);
        select
            .push(" ORDER BY processed_at DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query disbursements")?
            .iter()
            .map(disbursement_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to decode disbursement row")?;

        Ok(DisbursementPage { rows, total_count })
    }

    async fn all_disbursements(&self) -> Result<Vec<DisbursementRow>, AppError> {
        sqlx::query(&select_sql("disbursements", &DISBURSEMENT_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load disbursements")?
            .iter()
            .map(disbursement_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to decode disbursement row")
    }
}

#[async_trait]
impl OtpStore for PgStore {
    async fn set_otp(
        &self,
        phone_number: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM otp_storage WHERE phone_number = $1")
            .bind(phone_number)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous OTP")?;
        sqlx::query(
            r#"
            INSERT INTO otp_storage (phone_number, otp, expires_at, is_used, created_at)
            VALUES ($1, $2, $3, false, now())
            "#,
        )
        .bind(phone_number)
        .bind(otp)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .context("Failed to store OTP")?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_otp(&self, phone_number: &str) -> Result<Option<OtpRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT phone_number, otp, expires_at, is_used, created_at
            FROM otp_storage
            WHERE phone_number = $1 AND is_used = false
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read OTP")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record = OtpRecord {
            phone_number: row.try_get("phone_number")?,
            otp: row.try_get("otp")?,
            expires_at: row.try_get("expires_at")?,
            is_used: row.try_get("is_used")?,
            created_at: row.try_get("created_at")?,
        };

        if record.expires_at <= Utc::now() {
            self.mark_otp_as_used(phone_number).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn mark_otp_as_used(&self, phone_number: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE otp_storage SET is_used = true WHERE phone_number = $1 AND is_used = false",
        )
        .bind(phone_number)
        .execute(&self.pool)
        .await
        .context("Failed to mark OTP as used")?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM otp_storage WHERE expires_at < now()")
            .execute(&self.pool)
            .await
            .context("Failed to clean up expired OTPs")?;
        Ok(result.rows_affected())
    }
}
