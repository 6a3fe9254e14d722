use crate::models::Environment;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Connects an environment's database when one is configured. A failed
    /// connection only warns; calls that need the store fail later.
    pub async fn connect_environment(
        environment: Environment,
        database_url: Option<&str>,
    ) -> Option<Self> {
        let url = database_url?;
        match Self::new(url).await {
            Ok(db) => {
                tracing::info!("✓ {} database connection pool established", environment);
                Some(db)
            }
            Err(e) => {
                tracing::warn!("❌ Failed to connect to the {} database: {}", environment, e);
                None
            }
        }
    }
}
