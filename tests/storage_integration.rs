use std::env;
use uuid::Uuid;

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use loan_orchestrator::data::db::Database;
use loan_orchestrator::data::pg_store::PgStore;
use loan_orchestrator::data::store::{
    upsert_lead, DisbursementStore, LeadStore, LeadWrite, OtpStore,
};
use loan_orchestrator::disbursement_models::{DisbursementCandidate, DisbursementFilter, PageRequest};
use loan_orchestrator::disbursement_pipeline::ingest;
use loan_orchestrator::models::{Environment, LeadOperation, LeadRow, ProcessingStage};

/// Integration smoke tests for the Postgres store. The schema in `migrations/`
/// must already be applied. Marked ignored to avoid running against a shared
/// database by accident; set TEST_DATABASE_URL to run.
async fn store() -> anyhow::Result<PgStore> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;
    let db = Database::new(&db_url).await?;
    Ok(PgStore::new(db.pool))
}

#[tokio::test]
#[ignore]
async fn lead_upsert_round_trip() -> anyhow::Result<()> {
    let store = store().await?;

    // Unique identities so repeated runs do not collide.
    let api_id = Uuid::new_v4().to_string();
    let basic_app_id = format!("T{}", &api_id[..6].to_uppercase());

    let mut row = LeadRow::new(Environment::Orbit, LeadOperation::CreateLead);
    row.api_id = Some(api_id.clone());
    row.basic_app_id = Some(basic_app_id.clone());
    row.customer_mobile = Some("9876543210".into());
    row.loan_amount_req = Some(BigDecimal::from(2_500_000));
    row.fbb_api_response = Some(serde_json::json!({ "isError": false }));

    let created = upsert_lead(&store, row, LeadWrite::Success(LeadOperation::CreateLead))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(created.processing_stage, ProcessingStage::Fbb);

    let mut flash = LeadRow::new(Environment::Orbit, LeadOperation::LeadFlash);
    flash.api_id = Some(api_id.clone());
    flash.company_name = Some("Acme Pvt Ltd".into());
    let completed = upsert_lead(&store, flash, LeadWrite::Success(LeadOperation::LeadFlash))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(completed.lead_id, created.lead_id);
    assert_eq!(completed.processing_stage, ProcessingStage::Completed);

    let stored = store
        .find_lead_by_basic_app_id(&basic_app_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("lead not found"))?;
    assert_eq!(stored.company_name.as_deref(), Some("Acme Pvt Ltd"));
    assert_eq!(stored.loan_amount_req, Some(BigDecimal::from(2_500_000)));

    let updated = store
        .update_application_status(&basic_app_id, "Login")
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(updated);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn disbursement_ingest_and_query() -> anyhow::Result<()> {
    let store = store().await?;
    let basic_id = format!("BD-{}", Uuid::new_v4());

    let candidate = DisbursementCandidate {
        loan_account_number: Some(format!("LAN-{}", &basic_id[3..11])),
        basic_disbursement_id: Some(basic_id.clone()),
        disbursement_amount: Some("12,50,000".into()),
        app_bank_name: Some("Smoke Test Bank".into()),
        ..Default::default()
    };
    let outcome = ingest(&store, vec![candidate.clone()]).await;
    assert_eq!(outcome.report.new_records, 1);

    let mut again = candidate;
    again.disbursement_status = Some("Disbursed".into());
    let outcome = ingest(&store, vec![again]).await;
    assert_eq!(outcome.report.updated_records, 1);

    let page = store
        .query_disbursements(
            &DisbursementFilter {
                bank_name: Some("smoke test".into()),
                ..Default::default()
            },
            PageRequest { limit: 10, offset: 0 },
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(page.total_count >= 1);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn otp_lifecycle() -> anyhow::Result<()> {
    let store = store().await?;
    let phone = format!("9{:09}", Uuid::new_v4().as_u128() % 1_000_000_000);

    store
        .set_otp(&phone, "482913", Utc::now() + Duration::minutes(5))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let record = store
        .get_otp(&phone)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("otp not stored"))?;
    assert_eq!(record.otp, "482913");

    assert!(store
        .mark_otp_as_used(&phone)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?);
    assert!(!store
        .is_otp_exists(&phone)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?);

    Ok(())
}
