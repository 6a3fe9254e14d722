use crate::basic_client::BasicApiClient;
use crate::disbursement_models::{DisbursementQuery, DisbursementRow, DisbursementStats, PageInfo};
use crate::errors::AppError;
use crate::lead_lifecycle::LeadLifecycle;
use crate::lead_status::LeadStatusTracker;
use crate::models::*;
use crate::monitor::{
    CycleReport, DataFreshness, DisbursementAnalyzer, DisbursementMonitor, EmailSource,
    LatestDisbursements, MonitorConfig, MonitorStatus, SessionDisbursements, StartResponse,
    StopResponse,
};
use crate::notifier::Notifier;
use crate::otp::OtpService;
use crate::store::StoreRouter;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Environment-scoped store backends.
    pub stores: StoreRouter,
    /// CreateLead / LeadFlash workflows.
    pub leads: LeadLifecycle,
    pub otp: OtpService,
    pub lead_status: LeadStatusTracker,
    /// The single live-monitoring session.
    pub monitor: DisbursementMonitor,
}

impl AppState {
    pub fn new(
        client: BasicApiClient,
        stores: StoreRouter,
        notifier: Arc<dyn Notifier>,
        otp_ttl: chrono::Duration,
        email_source: Arc<dyn EmailSource>,
        analyzer: Arc<dyn DisbursementAnalyzer>,
    ) -> Self {
        Self {
            leads: LeadLifecycle::new(client.clone(), stores.clone(), notifier.clone()),
            otp: OtpService::new(stores.clone(), notifier.clone(), otp_ttl),
            lead_status: LeadStatusTracker::new(client, stores.clone(), notifier),
            monitor: DisbursementMonitor::new(email_source, analyzer, stores.clone()),
            stores,
        }
    }
}

/// `{success, message, data}` envelope used by the disbursement read endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[aliases(
    LatestEnvelope = DataEnvelope<LatestDisbursements>,
    SessionEnvelope = DataEnvelope<SessionDisbursements>,
    ManualCheckEnvelope = DataEnvelope<CycleReport>
)]
pub struct DataEnvelope<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> DataEnvelope<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DisbursementListResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<DisbursementRow>,
    pub total_count: i64,
    pub page_info: PageInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsBody {
    #[serde(flatten)]
    pub stats: DisbursementStats,
    pub data_freshness: DataFreshness,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub success: bool,
    pub message: String,
    pub stats: StatsBody,
}

/// Routes behind the rate limiter. `/health` is added separately.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create_lead", post(create_lead))
        .route("/lead_flash", post(lead_flash))
        .route("/lead_status", post(lead_status))
        .route("/otp_send", post(otp_send))
        .route("/otp_resend", post(otp_resend))
        .route("/otp_verify", post(otp_verify))
        .route("/live_disbursements_start", post(live_disbursements_start))
        .route("/live_disbursements_stop", post(live_disbursements_stop))
        .route("/live_disbursements_status", get(live_disbursements_status))
        .route("/disbursements", get(list_disbursements))
        .route("/disbursements/stats", get(disbursement_stats))
        .route("/disbursements/latest", get(latest_disbursements))
        .route("/disbursements/session", get(session_disbursements))
        .route("/disbursements/manual-check", post(manual_check))
}

// ============ Health ============

/// Health check endpoint.
///
/// Reports which tenant environments have a store configured.
#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "loan-orchestrator",
            "version": env!("CARGO_PKG_VERSION"),
            "environments": {
                "orbit": state.stores.is_configured(Environment::Orbit),
                "homfinity": state.stores.is_configured(Environment::Homfinity),
            }
        })),
    )
}

// ============ Leads ============

/// POST /create_lead
///
/// Validates the lead, creates the FBB application upstream and records the lead.
#[utoipa::path(
    post,
    path = "/create_lead",
    request_body = LeadCreateRequest,
    responses(
        (status = 200, description = "Lead created", body = LeadCreateResponse),
        (status = 400, description = "Upstream rejected the lead"),
        (status = 422, description = "Validation failed"),
        (status = 500, description = "Configuration or internal error")
    )
)]
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeadCreateRequest>,
) -> Result<Json<LeadCreateResponse>, AppError> {
    tracing::info!(
        "POST /create_lead - environment: {:?}",
        request.environment
    );
    Ok(Json(state.leads.create_lead(request).await?))
}

/// POST /lead_flash
///
/// Completes an existing application with profession and property details.
#[utoipa::path(
    post,
    path = "/lead_flash",
    request_body = LeadFlashRequest,
    responses(
        (status = 200, description = "Lead details added", body = LeadFlashResponse),
        (status = 400, description = "Upstream rejected the lead"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn lead_flash(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeadFlashRequest>,
) -> Result<Json<LeadFlashResponse>, AppError> {
    tracing::info!(
        "POST /lead_flash - applicationId: {:?}",
        request.application_id
    );
    Ok(Json(state.leads.lead_flash(request).await?))
}

#[utoipa::path(
    post,
    path = "/lead_status",
    request_body = LeadStatusRequest,
    responses(
        (status = 200, description = "Latest status, or \"Not Found\"", body = LeadStatusResponse),
        (status = 400, description = "No identifier given"),
        (status = 422, description = "Malformed mobile number")
    )
)]
pub async fn lead_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeadStatusRequest>,
) -> Result<Json<LeadStatusResponse>, AppError> {
    Ok(Json(state.lead_status.track(request).await?))
}

// ============ OTP ============

#[utoipa::path(
    post,
    path = "/otp_send",
    request_body = OtpSendRequest,
    responses(
        (status = 200, description = "OTP sent", body = OtpResponse),
        (status = 400, description = "Invalid phone number"),
        (status = 500, description = "Delivery failed")
    )
)]
pub async fn otp_send(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OtpSendRequest>,
) -> Result<Json<OtpResponse>, AppError> {
    Ok(Json(state.otp.send(&request.phone_number).await?))
}

#[utoipa::path(
    post,
    path = "/otp_resend",
    request_body = OtpSendRequest,
    responses((status = 200, description = "OTP resent", body = OtpResponse))
)]
pub async fn otp_resend(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OtpSendRequest>,
) -> Result<Json<OtpResponse>, AppError> {
    Ok(Json(state.otp.resend(&request.phone_number).await?))
}

#[utoipa::path(
    post,
    path = "/otp_verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "OTP verified", body = OtpResponse),
        (status = 400, description = "Wrong code"),
        (status = 404, description = "No active OTP")
    )
)]
pub async fn otp_verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OtpVerifyRequest>,
) -> Result<Json<OtpResponse>, AppError> {
    Ok(Json(
        state
            .otp
            .verify(&request.phone_number, &request.otp)
            .await?,
    ))
}

// ============ Live Monitoring ============

#[utoipa::path(
    post,
    path = "/live_disbursements_start",
    request_body = MonitorConfig,
    responses(
        (status = 200, description = "Monitoring started", body = StartResponse),
        (status = 400, description = "Already running"),
        (status = 422, description = "Invalid configuration")
    )
)]
pub async fn live_disbursements_start(
    State(state): State<Arc<AppState>>,
    Json(config): Json<MonitorConfig>,
) -> Result<Json<StartResponse>, AppError> {
    Ok(Json(state.monitor.start(config).await?))
}

#[utoipa::path(
    post,
    path = "/live_disbursements_stop",
    responses(
        (status = 200, description = "Monitoring stopped", body = StopResponse),
        (status = 400, description = "Not running")
    )
)]
pub async fn live_disbursements_stop(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StopResponse>, AppError> {
    Ok(Json(state.monitor.stop().await?))
}

#[utoipa::path(
    get,
    path = "/live_disbursements_status",
    responses((status = 200, description = "Monitor snapshot", body = MonitorStatus))
)]
pub async fn live_disbursements_status(State(state): State<Arc<AppState>>) -> Json<MonitorStatus> {
    Json(state.monitor.status().await)
}

// ============ Disbursements ============

/// GET /disbursements
///
/// Filtered, paginated disbursement rows, newest first.
#[utoipa::path(
    get,
    path = "/disbursements",
    params(DisbursementQuery),
    responses(
        (status = 200, description = "One page of disbursements", body = DisbursementListResponse),
        (status = 422, description = "Invalid filter or page")
    )
)]
pub async fn list_disbursements(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DisbursementQuery>,
) -> Result<Json<DisbursementListResponse>, AppError> {
    let (filter, page) = query.into_parts()?;
    let store = state.stores.disbursements()?;
    let result = store.query_disbursements(&filter, page).await?;

    Ok(Json(DisbursementListResponse {
        success: true,
        message: format!("Retrieved {} disbursement records", result.rows.len()),
        page_info: PageInfo::new(page, result.total_count),
        total_count: result.total_count,
        data: result.rows,
    }))
}

#[utoipa::path(
    get,
    path = "/disbursements/stats",
    responses((status = 200, description = "Aggregate statistics", body = StatsResponse))
)]
pub async fn disbursement_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, AppError> {
    let rows = state.stores.disbursements()?.all_disbursements().await?;
    let stats = DisbursementStats::from_rows(&rows, chrono::Utc::now());

    Ok(Json(StatsResponse {
        success: true,
        message: "Disbursement statistics calculated successfully".to_string(),
        stats: StatsBody {
            stats,
            data_freshness: state.monitor.freshness().await,
        },
    }))
}

#[utoipa::path(
    get,
    path = "/disbursements/latest",
    responses((status = 200, description = "Records from the latest cycle", body = LatestEnvelope))
)]
pub async fn latest_disbursements(
    State(state): State<Arc<AppState>>,
) -> Json<DataEnvelope<LatestDisbursements>> {
    let latest = state.monitor.latest().await;
    DataEnvelope::ok(
        format!("Retrieved {} latest disbursements", latest.count),
        latest,
    )
}

#[utoipa::path(
    get,
    path = "/disbursements/session",
    responses((status = 200, description = "Records from this session", body = SessionEnvelope))
)]
pub async fn session_disbursements(
    State(state): State<Arc<AppState>>,
) -> Json<DataEnvelope<SessionDisbursements>> {
    let session = state.monitor.session().await;
    DataEnvelope::ok(
        format!("Retrieved {} session disbursements", session.count),
        session,
    )
}

/// POST /disbursements/manual-check
///
/// Runs one monitoring cycle now. Requires an active session.
#[utoipa::path(
    post,
    path = "/disbursements/manual-check",
    responses(
        (status = 200, description = "Cycle result", body = ManualCheckEnvelope),
        (status = 400, description = "Monitoring is not running")
    )
)]
pub async fn manual_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DataEnvelope<CycleReport>>, AppError> {
    let report = state.monitor.manual_check().await?;
    Ok(DataEnvelope::ok("Manual disbursement check completed", report))
}
