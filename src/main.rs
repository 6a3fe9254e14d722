use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use loan_orchestrator::api::handlers::{self, AppState};
use loan_orchestrator::api::openapi::ApiDoc;
use loan_orchestrator::config::Config;
use loan_orchestrator::core::models::Environment;
use loan_orchestrator::core::monitor::{UnconfiguredAnalyzer, UnconfiguredEmailSource};
use loan_orchestrator::data::db::Database;
use loan_orchestrator::data::memory_store::MemoryStore;
use loan_orchestrator::data::store::{Backend, StoreRouter};
use loan_orchestrator::integrations::basic_client::BasicApiClient;
use loan_orchestrator::integrations::notifier::GupshupNotifier;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the per-environment database pools, the
/// upstream and WhatsApp clients, then serves the HTTP routes with CORS, body
/// limit and rate limiting.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loan_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // One pool per configured environment; failures only warn
    let orbit = Database::connect_environment(
        Environment::Orbit,
        config.orbit_database_url.as_deref(),
    )
    .await;
    let homfinity = Database::connect_environment(
        Environment::Homfinity,
        config.homfinity_database_url.as_deref(),
    )
    .await;

    let homfinity_missing = homfinity.is_none();
    let mut stores = StoreRouter::new(
        orbit.map(|db| Backend::postgres(db.pool)),
        homfinity.map(|db| Backend::postgres(db.pool)),
    );
    if homfinity_missing {
        tracing::warn!("Homfinity database unavailable, OTP codes are kept in memory");
        stores = stores.with_otp_fallback(Arc::new(MemoryStore::new()));
    }
    match stores.default_environment() {
        Some(env) => tracing::info!("Default database environment: {}", env),
        None => tracing::warn!("No database environment available"),
    }

    let client = BasicApiClient::new(&config)?;
    tracing::info!("✓ Basic Application API client initialized");

    let notifier = Arc::new(GupshupNotifier::new(config.gupshup.clone())?);
    tracing::info!("✓ WhatsApp notifier initialized");

    // Build application state
    let app_state = Arc::new(AppState::new(
        client,
        stores,
        notifier,
        config.otp_ttl(),
        Arc::new(UnconfiguredEmailSource),
        Arc::new(UnconfiguredAnalyzer),
    ));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = handlers::api_routes()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(app_state))
    .await?;

    Ok(())
}

/// Waits for Ctrl-C, then stops the monitor if a session is active.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
    if state.monitor.status().await.is_running {
        if let Err(e) = state.monitor.stop().await {
            tracing::warn!("Monitor did not stop cleanly: {}", e);
        }
    }
}
