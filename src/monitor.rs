//! Live disbursement monitoring: one background worker that polls an email source,
//! runs each new item through the analyzer and ingests the extracted records.

use crate::disbursement_models::{DisbursementCandidate, DisbursementRow, RawDisbursement, SourceTag};
use crate::disbursement_pipeline::ingest;
use crate::errors::{AppError, ResultExt};
use crate::store::StoreRouter;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Extra lookback on every fetch to tolerate clock skew at the source.
const LOOKBACK_MARGIN_MINUTES: i64 = 60;
const MAX_ITEMS_PER_FOLDER: usize = 100;
const CRASH_BACKOFF: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERRORS: usize = 50;
const RECENT_ERRORS: usize = 10;
const MAX_SESSION_RECORDS: usize = 1000;
const MAX_SAVE_ERRORS_PER_CYCLE: usize = 5;
pub const LIVE_PROCESSING_TYPE: &str = "live";

// ============ Seams ============

/// One message fetched from the email source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailItem {
    pub message_id: Option<String>,
    pub subject: String,
    pub sender: String,
    /// Date header as sent; parsed leniently.
    pub date: Option<String>,
    pub body: String,
}

impl EmailItem {
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|d| d.with_timezone(&Utc))
            .ok()
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag {
            email_subject: Some(self.subject.clone()),
            email_sender: Some(self.sender.clone()),
            email_date: self.received_at(),
            source_email_id: self.message_id.clone(),
            processing_type: Some(LIVE_PROCESSING_TYPE.to_string()),
        }
    }
}

#[async_trait]
pub trait EmailSource: Send + Sync {
    /// Verifies that the source is reachable and the credentials work.
    async fn connect(&self) -> Result<(), AppError>;

    async fn fetch_since(
        &self,
        folder: &str,
        since: DateTime<Utc>,
        max_items: usize,
    ) -> Result<Vec<EmailItem>, AppError>;
}

#[async_trait]
pub trait DisbursementAnalyzer: Send + Sync {
    /// Extracts zero or more disbursement records from one message.
    async fn analyze(&self, item: &EmailItem) -> Result<Vec<RawDisbursement>, AppError>;
}

/// Used when no mailbox integration is wired in; every call is a configuration error.
pub struct UnconfiguredEmailSource;

#[async_trait]
impl EmailSource for UnconfiguredEmailSource {
    async fn connect(&self) -> Result<(), AppError> {
        Err(AppError::Configuration("Email source is not configured".to_string()))
    }

    async fn fetch_since(
        &self,
        _folder: &str,
        _since: DateTime<Utc>,
        _max_items: usize,
    ) -> Result<Vec<EmailItem>, AppError> {
        Err(AppError::Configuration("Email source is not configured".to_string()))
    }
}

pub struct UnconfiguredAnalyzer;

#[async_trait]
impl DisbursementAnalyzer for UnconfiguredAnalyzer {
    async fn analyze(&self, _item: &EmailItem) -> Result<Vec<RawDisbursement>, AppError> {
        Err(AppError::Configuration(
            "Disbursement analyzer is not configured".to_string(),
        ))
    }
}

// ============ Configuration ============

fn default_polling_interval() -> u64 {
    60
}

fn default_folders() -> Vec<String> {
    vec!["INBOX".to_string()]
}

fn default_check_period() -> i64 {
    5
}

/// Body of `POST /live_disbursements_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MonitorConfig {
    /// Seconds between cycles, 10..=3600.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_folders")]
    pub email_folders: Vec<String>,
    #[serde(default)]
    pub subject_filter: Option<String>,
    #[serde(default)]
    pub sender_filter: Option<String>,
    /// Lookback window in minutes, 1..=60.
    #[serde(default = "default_check_period")]
    pub check_period_minutes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            email_folders: default_folders(),
            subject_filter: None,
            sender_filter: None,
            check_period_minutes: default_check_period(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(10..=3600).contains(&self.polling_interval) {
            return Err(AppError::Validation(
                "polling_interval must be between 10 and 3600 seconds".to_string(),
            ));
        }
        if self.email_folders.is_empty() || self.email_folders.iter().any(|f| f.trim().is_empty()) {
            return Err(AppError::Validation(
                "email_folders must contain at least one folder name".to_string(),
            ));
        }
        if !(1..=60).contains(&self.check_period_minutes) {
            return Err(AppError::Validation(
                "check_period_minutes must be between 1 and 60".to_string(),
            ));
        }
        Ok(())
    }

    fn accepts(&self, item: &EmailItem) -> bool {
        let subject_ok = self
            .subject_filter
            .as_deref()
            .map(|f| item.subject.to_lowercase().contains(&f.to_lowercase()))
            .unwrap_or(true);
        let sender_ok = self
            .sender_filter
            .as_deref()
            .map(|f| item.sender.to_lowercase().contains(&f.to_lowercase()))
            .unwrap_or(true);
        subject_ok && sender_ok
    }
}

// ============ Responses ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MonitorError {
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
    pub config: MonitorConfig,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FinalStats {
    pub emails_processed: u64,
    pub disbursements_found: u64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
    pub final_stats: FinalStats,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MonitorStatus {
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_seconds: i64,
    pub emails_processed: u64,
    pub disbursements_found: u64,
    pub next_check: Option<DateTime<Utc>>,
    pub error_count: usize,
    pub recent_errors: Vec<MonitorError>,
    pub config: Option<MonitorConfig>,
}

/// What one cycle saw and saved.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CycleReport {
    pub emails_checked: usize,
    pub new_emails_processed: usize,
    pub disbursements_found: usize,
    pub new_disbursements: Vec<DisbursementRow>,
    pub saved: usize,
    pub updated: usize,
    pub errors: usize,
    pub check_duration: f64,
    pub total_processed_emails: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LatestDisbursements {
    pub disbursements: Vec<DisbursementRow>,
    pub count: usize,
    pub last_extracted_at: Option<DateTime<Utc>>,
    pub monitoring_active: bool,
    pub total_session_disbursements: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionDisbursements {
    pub disbursements: Vec<DisbursementRow>,
    pub count: usize,
    pub session_started_at: Option<DateTime<Utc>>,
    pub monitoring_active: bool,
    pub emails_processed: u64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Monitor snapshot attached to disbursement statistics.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DataFreshness {
    pub live_monitoring_active: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub emails_processed: u64,
    pub disbursements_found: u64,
    pub session_disbursements: usize,
}

// ============ Monitor ============

#[derive(Default)]
struct MonitorState {
    is_running: bool,
    started_at: Option<DateTime<Utc>>,
    last_check: Option<DateTime<Utc>>,
    emails_processed: u64,
    disbursements_found: u64,
    errors: VecDeque<MonitorError>,
    config: Option<MonitorConfig>,
    seen: HashSet<String>,
    latest: Vec<DisbursementRow>,
    last_disbursement_check: Option<DateTime<Utc>>,
    session: Vec<DisbursementRow>,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl MonitorState {
    fn record_error(&mut self, error: String) {
        tracing::error!("{}", error);
        self.errors.push_back(MonitorError {
            timestamp: Utc::now(),
            error,
        });
        while self.errors.len() > MAX_ERRORS {
            self.errors.pop_front();
        }
    }

    fn uptime_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|s| (now - s).num_seconds().max(0))
            .unwrap_or(0)
    }
}

struct MonitorInner {
    state: Mutex<MonitorState>,
    source: Arc<dyn EmailSource>,
    analyzer: Arc<dyn DisbursementAnalyzer>,
    stores: StoreRouter,
}

/// Handle to the single monitoring session. Clones share the same session.
#[derive(Clone)]
pub struct DisbursementMonitor {
    inner: Arc<MonitorInner>,
}

impl DisbursementMonitor {
    pub fn new(
        source: Arc<dyn EmailSource>,
        analyzer: Arc<dyn DisbursementAnalyzer>,
        stores: StoreRouter,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(MonitorState::default()),
                source,
                analyzer,
                stores,
            }),
        }
    }

    /// Starts the background worker. The source handshake runs without the state
    /// lock; `is_running` is checked again under the lock before the worker is
    /// registered, so two concurrent starts cannot both succeed.
    pub async fn start(&self, config: MonitorConfig) -> Result<StartResponse, AppError> {
        config.validate()?;

        if self.inner.state.lock().await.is_running {
            return Err(already_running());
        }

        self.inner
            .source
            .connect()
            .await
            .context("Failed to connect to email source")?;

        let mut state = self.inner.state.lock().await;
        if state.is_running {
            return Err(already_running());
        }

        if self.inner.stores.disbursements().is_err() {
            tracing::warn!("No disbursement store configured, extracted records will not be saved");
        }

        let started_at = Utc::now();
        let token = CancellationToken::new();
        *state = MonitorState {
            is_running: true,
            started_at: Some(started_at),
            config: Some(config.clone()),
            cancel: Some(token.clone()),
            ..MonitorState::default()
        };

        let worker = tokio::spawn(run_loop(self.clone(), config.clone(), token));
        state.worker = Some(worker);

        tracing::info!(
            "✓ Live disbursement monitoring started (every {}s, folders {:?})",
            config.polling_interval,
            config.email_folders
        );
        Ok(StartResponse {
            success: true,
            message: "Live monitoring started successfully".to_string(),
            config,
            started_at,
        })
    }

    /// Signals the worker and waits briefly for it to exit.
    pub async fn stop(&self) -> Result<StopResponse, AppError> {
        let (worker, final_stats) = {
            let mut state = self.inner.state.lock().await;
            if !state.is_running {
                return Err(AppError::BadRequest(
                    "Live monitoring is not running".to_string(),
                ));
            }
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.is_running = false;
            let stats = FinalStats {
                emails_processed: state.emails_processed,
                disbursements_found: state.disbursements_found,
                uptime_seconds: state.uptime_seconds(Utc::now()),
            };
            (state.worker.take(), stats)
        };

        if let Some(worker) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, worker).await.is_err() {
                tracing::warn!("Monitoring worker did not exit within {:?}", STOP_TIMEOUT);
            }
        }

        tracing::info!("Live disbursement monitoring stopped");
        Ok(StopResponse {
            success: true,
            message: "Live monitoring stopped successfully".to_string(),
            final_stats,
        })
    }

    pub async fn status(&self) -> MonitorStatus {
        let state = self.inner.state.lock().await;
        let now = Utc::now();
        let next_check = match (&state.config, state.last_check) {
            (Some(config), Some(last)) if state.is_running => {
                Some(last + ChronoDuration::seconds(config.polling_interval as i64))
            }
            _ => None,
        };
        let skip = state.errors.len().saturating_sub(RECENT_ERRORS);

        MonitorStatus {
            is_running: state.is_running,
            started_at: state.started_at,
            last_check: state.last_check,
            uptime_seconds: if state.is_running {
                state.uptime_seconds(now)
            } else {
                0
            },
            emails_processed: state.emails_processed,
            disbursements_found: state.disbursements_found,
            next_check,
            error_count: state.errors.len(),
            recent_errors: state.errors.iter().skip(skip).cloned().collect(),
            config: state.config.clone(),
        }
    }

    /// Runs one cycle now with the active configuration.
    pub async fn manual_check(&self) -> Result<CycleReport, AppError> {
        let (config, token) = {
            let state = self.inner.state.lock().await;
            match (&state.config, &state.cancel) {
                (Some(config), Some(token)) if state.is_running => (config.clone(), token.clone()),
                _ => {
                    return Err(AppError::BadRequest(
                        "Live monitoring is not running. Start monitoring first.".to_string(),
                    ))
                }
            }
        };
        self.check_once(&config, &token).await
    }

    pub async fn latest(&self) -> LatestDisbursements {
        let state = self.inner.state.lock().await;
        LatestDisbursements {
            disbursements: state.latest.clone(),
            count: state.latest.len(),
            last_extracted_at: state.last_disbursement_check,
            monitoring_active: state.is_running,
            total_session_disbursements: state.session.len(),
        }
    }

    pub async fn session(&self) -> SessionDisbursements {
        let state = self.inner.state.lock().await;
        SessionDisbursements {
            disbursements: state.session.clone(),
            count: state.session.len(),
            session_started_at: state.started_at,
            monitoring_active: state.is_running,
            emails_processed: state.emails_processed,
            last_check: state.last_check,
        }
    }

    pub async fn freshness(&self) -> DataFreshness {
        let state = self.inner.state.lock().await;
        DataFreshness {
            live_monitoring_active: state.is_running,
            last_check: state.last_check,
            emails_processed: state.emails_processed,
            disbursements_found: state.disbursements_found,
            session_disbursements: state.session.len(),
        }
    }

    /// State lock for a cycle running under `token`. A cancelled token belongs to
    /// a stopped session, so the cycle gets `None` and its results are dropped.
    async fn session_state(&self, token: &CancellationToken) -> Option<MutexGuard<'_, MonitorState>> {
        let state = self.inner.state.lock().await;
        if token.is_cancelled() {
            None
        } else {
            Some(state)
        }
    }

    async fn record_error(&self, token: &CancellationToken, error: String) {
        match self.session_state(token).await {
            Some(mut state) => state.record_error(error),
            None => tracing::warn!("Dropping error from stopped session: {}", error),
        }
    }

    /// Items that pass the time and subject/sender filters, across every folder.
    async fn fetch_candidates(
        &self,
        config: &MonitorConfig,
        since: DateTime<Utc>,
        token: &CancellationToken,
    ) -> Vec<EmailItem> {
        let broader_since = since - ChronoDuration::minutes(LOOKBACK_MARGIN_MINUTES);
        let mut items = Vec::new();

        for folder in &config.email_folders {
            if token.is_cancelled() {
                break;
            }
            let fetched = match self
                .inner
                .source
                .fetch_since(folder, broader_since, MAX_ITEMS_PER_FOLDER)
                .await
            {
                Ok(fetched) => fetched,
                Err(e) => {
                    self.record_error(
                        token,
                        format!("Error fetching emails from folder {}: {}", folder, e),
                    )
                    .await;
                    continue;
                }
            };

            let total = fetched.len();
            let kept: Vec<EmailItem> = fetched
                .into_iter()
                // Undated or unparseable items are kept.
                .filter(|item| item.received_at().map(|d| d >= since).unwrap_or(true))
                .filter(|item| config.accepts(item))
                .collect();
            tracing::info!(
                "Found {} time-filtered emails in folder '{}' (from {} total)",
                kept.len(),
                folder,
                total
            );
            items.extend(kept);
        }
        items
    }

    /// Claims unseen items in the seen-set and returns them.
    async fn claim_unseen(&self, items: Vec<EmailItem>, token: &CancellationToken) -> Vec<EmailItem> {
        let Some(mut state) = self.session_state(token).await else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter(|item| match item.message_id.as_deref() {
                Some(id) => state.seen.insert(id.to_string()),
                None => {
                    tracing::debug!("Skipping email without message id: {}", item.subject);
                    false
                }
            })
            .collect()
    }

    /// One poll: fetch, filter, analyze and ingest.
    pub async fn check_once(
        &self,
        config: &MonitorConfig,
        token: &CancellationToken,
    ) -> Result<CycleReport, AppError> {
        let check_start = Utc::now();
        let since = check_start - ChronoDuration::minutes(config.check_period_minutes);
        tracing::info!("Checking for emails since {}", since);

        let fetched = self.fetch_candidates(config, since, token).await;
        let emails_checked = fetched.len();
        let unseen = self.claim_unseen(fetched, token).await;
        tracing::info!(
            "New emails to process: {} (filtered from {} total)",
            unseen.len(),
            emails_checked
        );

        let mut candidates = Vec::new();
        for (i, item) in unseen.iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!("Stop requested, leaving {} emails unanalyzed", unseen.len() - i);
                break;
            }
            match self.inner.analyzer.analyze(item).await {
                Ok(records) => {
                    if !records.is_empty() {
                        tracing::info!("Found {} disbursements in email", records.len());
                    }
                    let tag = item.source_tag();
                    candidates.extend(records.into_iter().map(|mut raw| {
                        raw.source = Some(tag.clone());
                        DisbursementCandidate::from(raw)
                    }));
                }
                Err(e) => {
                    self.record_error(token, format!("Error analyzing email {}: {}", i + 1, e))
                        .await;
                }
            }
        }

        let disbursements_found = candidates.len();
        let mut report = CycleReport {
            emails_checked,
            new_emails_processed: unseen.len(),
            disbursements_found,
            ..CycleReport::default()
        };

        if !candidates.is_empty() {
            match self.inner.stores.disbursements() {
                Ok(store) => {
                    let outcome = ingest(store.as_ref(), candidates).await;
                    report.saved = outcome.report.new_records;
                    report.updated = outcome.report.updated_records;
                    report.errors = outcome.report.errors;
                    let failures: Vec<String> = outcome
                        .report
                        .details
                        .iter()
                        .filter(|d| d.starts_with("Error"))
                        .take(MAX_SAVE_ERRORS_PER_CYCLE)
                        .cloned()
                        .collect();
                    for failure in failures {
                        self.record_error(token, failure).await;
                    }
                    report.new_disbursements = outcome.saved;
                }
                Err(e) => {
                    report.errors = disbursements_found;
                    self.record_error(token, format!("Error saving disbursements: {}", e))
                        .await;
                }
            }
        }

        // Records extracted before a stop are saved, but the stopped session's
        // counters are not carried into the next one.
        let Some(mut state) = self.session_state(token).await else {
            tracing::info!("Monitoring stopped during the check, discarding cycle results");
            return Ok(report);
        };
        state.last_check = Some(check_start);
        state.emails_processed += report.new_emails_processed as u64;
        state.disbursements_found += disbursements_found as u64;
        if !report.new_disbursements.is_empty() {
            state.latest = report.new_disbursements.clone();
            state.last_disbursement_check = Some(check_start);
            state.session.extend(report.new_disbursements.iter().cloned());
            let overflow = state.session.len().saturating_sub(MAX_SESSION_RECORDS);
            state.session.drain(..overflow);
        }
        report.total_processed_emails = state.seen.len();
        report.check_duration = (Utc::now() - check_start).num_milliseconds() as f64 / 1000.0;

        tracing::info!(
            "✓ Email check completed: {} checked, {} new, {} disbursements, {} saved",
            report.emails_checked,
            report.new_emails_processed,
            report.disbursements_found,
            report.saved
        );
        Ok(report)
    }
}

fn already_running() -> AppError {
    AppError::BadRequest("Live monitoring is already running".to_string())
}

/// Worker body. A failed cycle is recorded and the normal interval follows; a
/// panicking cycle is recorded and followed by a fixed backoff.
async fn run_loop(monitor: DisbursementMonitor, config: MonitorConfig, token: CancellationToken) {
    tracing::info!("Live monitoring loop started");
    let interval = Duration::from_secs(config.polling_interval);

    while !token.is_cancelled() {
        let cycle = {
            let monitor = monitor.clone();
            let config = config.clone();
            let token = token.clone();
            tokio::spawn(async move { monitor.check_once(&config, &token).await }).await
        };

        let wait = match cycle {
            Ok(Ok(_)) => interval,
            Ok(Err(e)) => {
                monitor
                    .record_error(&token, format!("Monitoring loop error: {}", e))
                    .await;
                interval
            }
            Err(e) => {
                monitor
                    .record_error(&token, format!("Critical monitoring error: {}", e))
                    .await;
                CRASH_BACKOFF
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::info!("Live monitoring loop stopped");
}
