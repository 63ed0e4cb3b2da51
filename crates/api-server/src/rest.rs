//! REST handlers for funnel analytics, milestones and operational endpoints,
//! plus the shared application state and error mapping.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use quality_analytics::{BottleneckDetector, FunnelAggregator, FunnelSummary, MilestoneTimer};
use quality_core::config::AppConfig;
use quality_core::error::QualityError;
use quality_core::funnel::{
    BottleneckReport, ConversionRates, DailyFunnelSnapshot, FunnelBottleneck, FunnelEvent, FunnelStage,
    FunnelType, Milestone, MilestoneRecord, MilestoneStats,
};
use quality_core::stats::MAX_PERIOD_DAYS;
use quality_core::store::UserDirectory;
use quality_core::types::{Metadata, UserIdentity};
use quality_experience::{CsatTracker, NpsTracker, SharingTracker};
use quality_gamification::{BadgeCatalogue, BadgeEngine, RankingService};
use quality_store::InMemoryStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub start_time: Instant,
    pub funnels: Arc<FunnelAggregator>,
    pub bottlenecks: Arc<BottleneckDetector>,
    pub milestones: Arc<MilestoneTimer>,
    pub badges: Arc<BadgeEngine>,
    pub rankings: Arc<RankingService>,
    pub leaderboard_limit: usize,
    pub csat: Arc<CsatTracker>,
    pub nps: Arc<NpsTracker>,
    pub sharing: Arc<SharingTracker>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    /// Wire every service against a fresh in-process store.
    pub fn in_memory(config: &AppConfig, catalogue: BadgeCatalogue) -> Self {
        Self::with_store(config, catalogue, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: &AppConfig, catalogue: BadgeCatalogue, store: Arc<InMemoryStore>) -> Self {
        let funnels = Arc::new(FunnelAggregator::new(store.clone(), store.clone(), &config.funnel));
        let sharing = Arc::new(SharingTracker::new(store.clone(), store.clone(), &config.experience));
        Self {
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
            bottlenecks: Arc::new(BottleneckDetector::new(funnels.clone(), store.clone())),
            funnels,
            milestones: Arc::new(MilestoneTimer::new(store.clone())),
            badges: Arc::new(BadgeEngine::new(
                Arc::new(catalogue),
                store.clone(),
                &config.gamification,
            )),
            rankings: Arc::new(RankingService::new(store.clone())),
            leaderboard_limit: config.gamification.leaderboard_limit,
            csat: Arc::new(CsatTracker::new(store.clone(), &config.experience)),
            nps: Arc::new(NpsTracker::new(store.clone(), sharing.clone(), &config.experience)),
            sharing,
            directory: store,
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Caller mistakes map to 400, missing documents to 404 and store failures
/// to 500.
#[derive(Debug)]
pub enum ApiError {
    Quality(QualityError),
    NotFound(String),
}

impl From<QualityError> for ApiError {
    fn from(e: QualityError) -> Self {
        ApiError::Quality(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::Quality(e) if e.is_invalid_input() => {
                metrics::counter!("api.validation_errors").increment(1);
                (StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
            }
            ApiError::Quality(e) => {
                metrics::counter!("api.errors").increment(1);
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
            }
        };
        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period_days: Option<u32>,
}

impl PeriodQuery {
    /// Requested look-back, `default` when absent or zero.
    pub fn days_or(&self, default: u32) -> Result<u32, ApiError> {
        match self.period_days.filter(|d| *d > 0) {
            Some(days) if days > MAX_PERIOD_DAYS => Err(QualityError::Validation(format!(
                "period_days must be at most {MAX_PERIOD_DAYS}, got {days}"
            ))
            .into()),
            Some(days) => Ok(days),
            None => Ok(default),
        }
    }
}

// ─── Operational ────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

// ─── Funnels ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FunnelEventRequest {
    pub user_id: String,
    pub user_email: String,
    pub stage: FunnelStage,
    #[serde(default)]
    pub metadata: Metadata,
}

/// POST /v1/funnel-events/:domain_id
pub async fn record_funnel_event(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<FunnelEventRequest>,
) -> Result<(StatusCode, Json<FunnelEvent>), ApiError> {
    let event = state.funnels.record_event(
        &domain_id,
        &request.user_id,
        &request.user_email,
        request.stage,
        request.metadata,
    )?;
    // Every actor seen in a funnel counts as an active user of the domain.
    if let Err(e) = state
        .directory
        .register_user(UserIdentity::new(request.user_id, request.user_email))
    {
        warn!(error = %e, domain_id = %domain_id, "Failed to register user");
    }
    Ok((StatusCode::CREATED, Json(event)))
}

fn funnel_type(raw: &str) -> Result<FunnelType, ApiError> {
    Ok(raw.parse::<FunnelType>()?)
}

/// GET /v1/funnels/:domain_id/:funnel_type/rates
pub async fn conversion_rates(
    State(state): State<AppState>,
    Path((domain_id, funnel)): Path<(String, String)>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<ConversionRates> {
    let funnel_type = funnel_type(&funnel)?;
    let period = query.days_or(state.funnels.default_period_days())?;
    Ok(Json(state.funnels.conversion_rates(&domain_id, funnel_type, period)))
}

/// GET /v1/funnels/:domain_id/:funnel_type/bottlenecks
pub async fn bottlenecks(
    State(state): State<AppState>,
    Path((domain_id, funnel)): Path<(String, String)>,
) -> ApiResult<Vec<FunnelBottleneck>> {
    let funnel_type = funnel_type(&funnel)?;
    Ok(Json(state.bottlenecks.detect(&domain_id, funnel_type)))
}

/// GET /v1/funnels/:domain_id/:funnel_type/report
pub async fn latest_report(
    State(state): State<AppState>,
    Path((domain_id, funnel)): Path<(String, String)>,
) -> ApiResult<BottleneckReport> {
    let funnel_type = funnel_type(&funnel)?;
    state
        .bottlenecks
        .latest_report(&domain_id, funnel_type)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no bottleneck report for {domain_id}/{funnel_type}")))
}

/// GET /v1/funnels/:domain_id/:funnel_type/history
pub async fn report_history(
    State(state): State<AppState>,
    Path((domain_id, funnel)): Path<(String, String)>,
) -> ApiResult<Vec<BottleneckReport>> {
    let funnel_type = funnel_type(&funnel)?;
    Ok(Json(state.bottlenecks.history(&domain_id, funnel_type)))
}

/// GET /v1/funnels/:domain_id/:funnel_type/snapshots/:date
pub async fn daily_snapshot(
    State(state): State<AppState>,
    Path((domain_id, funnel, date)): Path<(String, String, String)>,
) -> ApiResult<Option<DailyFunnelSnapshot>> {
    let funnel_type = funnel_type(&funnel)?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| QualityError::Validation(format!("invalid date {date}: {e}")))?;
    Ok(Json(state.funnels.snapshot(&domain_id, funnel_type, date)?))
}

/// GET /v1/funnels/:domain_id
pub async fn funnel_summary(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<FunnelSummary> {
    let period = query.days_or(state.funnels.default_period_days())?;
    Ok(Json(state.bottlenecks.funnel_summary(&domain_id, period)))
}

// ─── Milestones ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MilestoneRequest {
    pub user_id: String,
    pub milestone: Milestone,
    pub duration_ms: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// POST /v1/milestones/:domain_id
pub async fn record_milestone(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<MilestoneRequest>,
) -> Result<(StatusCode, Json<MilestoneRecord>), ApiError> {
    let record = state.milestones.record(
        &domain_id,
        &request.user_id,
        request.milestone,
        request.duration_ms,
        request.metadata,
    )?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/milestones/:domain_id
pub async fn milestone_times(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<BTreeMap<Milestone, MilestoneStats>> {
    let period = query.days_or(state.funnels.default_period_days())?;
    Ok(Json(state.milestones.average_times(&domain_id, period)))
}
