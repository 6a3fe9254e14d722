//! Script to delete expired OTP codes from the homfinity database.

use dotenvy::dotenv;
use loan_orchestrator::pg_store::PgStore;
use loan_orchestrator::store::OtpStore;
use sqlx::postgres::PgPoolOptions;

/// Connects to `HOMFINITY_DATABASE_URL` and removes every `otp_storage` row whose
/// expiry has passed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("HOMFINITY_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("HOMFINITY_DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database. Removing expired OTP codes...");
    let removed = PgStore::new(pool).cleanup_expired().await?;
    tracing::info!("Cleanup complete. Deleted {} expired OTP codes.", removed);

    Ok(())
}
