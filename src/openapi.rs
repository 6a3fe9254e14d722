//! OpenAPI document for the HTTP surface, served through Swagger UI at `/docs`.

use crate::disbursement_models::{
    BankStats, DisbursementRow, DisbursementStats, IngestionReport, PageInfo, RecentActivity,
    StatsOverview,
};
use crate::handlers::{
    self, DisbursementListResponse, LatestEnvelope, ManualCheckEnvelope, SessionEnvelope,
    StatsBody, StatsResponse,
};
use crate::models::{
    Environment, LeadCreateRequest, LeadCreateResponse, LeadFlashRequest, LeadFlashResponse,
    LeadStatusRequest, LeadStatusResponse, OtpResponse, OtpSendRequest, OtpVerifyRequest,
};
use crate::monitor::{
    CycleReport, DataFreshness, FinalStats, LatestDisbursements, MonitorConfig, MonitorError,
    MonitorStatus, SessionDisbursements, StartResponse, StopResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Loan Orchestrator API",
        description = "Lead lifecycle, OTP and disbursement monitoring endpoints"
    ),
    paths(
        handlers::health,
        handlers::create_lead,
        handlers::lead_flash,
        handlers::lead_status,
        handlers::otp_send,
        handlers::otp_resend,
        handlers::otp_verify,
        handlers::live_disbursements_start,
        handlers::live_disbursements_stop,
        handlers::live_disbursements_status,
        handlers::list_disbursements,
        handlers::disbursement_stats,
        handlers::latest_disbursements,
        handlers::session_disbursements,
        handlers::manual_check,
    ),
    components(schemas(
        Environment,
        LeadCreateRequest,
        LeadCreateResponse,
        LeadFlashRequest,
        LeadFlashResponse,
        LeadStatusRequest,
        LeadStatusResponse,
        OtpSendRequest,
        OtpVerifyRequest,
        OtpResponse,
        MonitorConfig,
        MonitorError,
        MonitorStatus,
        StartResponse,
        StopResponse,
        FinalStats,
        CycleReport,
        LatestDisbursements,
        SessionDisbursements,
        DataFreshness,
        DisbursementRow,
        DisbursementListResponse,
        PageInfo,
        DisbursementStats,
        StatsOverview,
        BankStats,
        RecentActivity,
        StatsBody,
        StatsResponse,
        IngestionReport,
        LatestEnvelope,
        SessionEnvelope,
        ManualCheckEnvelope,
    )),
    tags((name = "loan-orchestrator"))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/create_lead",
            "/lead_flash",
            "/lead_status",
            "/otp_send",
            "/otp_resend",
            "/otp_verify",
            "/live_disbursements_start",
            "/live_disbursements_stop",
            "/live_disbursements_status",
            "/disbursements",
            "/disbursements/stats",
            "/disbursements/latest",
            "/disbursements/session",
            "/disbursements/manual-check",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
