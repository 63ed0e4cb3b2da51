//! CSAT, NPS and sharing REST endpoints.

use crate::rest::{ApiError, ApiResult, AppState, PeriodQuery};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use quality_core::experience::{CsatEvent, ExperienceType, NpsEvent, ShareEvent, SharePlatform, ShareType};
use quality_core::types::Metadata;
use quality_experience::{CsatSummary, DetractorFollowUp, NpsSummary, ShareActivity, SurveyTrigger};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CsatRequest {
    pub user_id: String,
    pub interaction_id: String,
    pub experience_type: ExperienceType,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct SurveyRequest {
    pub user_id: String,
    pub experience_type: ExperienceType,
    #[serde(default)]
    pub context: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct NpsRequest {
    pub user_id: String,
    pub user_email: String,
    pub score: u8,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub shared_with: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub user_id: String,
    pub share_type: ShareType,
    pub platform: SharePlatform,
    pub recipient_count: u32,
    #[serde(default)]
    pub context: Metadata,
}

/// POST /v1/experience/:domain_id/csat
pub async fn record_csat(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<CsatRequest>,
) -> Result<(StatusCode, Json<CsatEvent>), ApiError> {
    let event = state.csat.record(
        &request.user_id,
        &domain_id,
        &request.interaction_id,
        request.experience_type,
        request.rating,
        request.comment,
        request.metadata,
    )?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /v1/experience/:domain_id/csat
pub async fn csat_summary(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<CsatSummary> {
    let period = query.days_or(state.funnels.default_period_days())?;
    Ok(Json(state.csat.summary(&domain_id, period)))
}

/// POST /v1/experience/:domain_id/csat/survey
pub async fn csat_survey(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<SurveyRequest>,
) -> Json<SurveyTrigger> {
    Json(state.csat.should_survey(
        &request.user_id,
        &domain_id,
        request.experience_type,
        request.context,
    ))
}

/// POST /v1/experience/:domain_id/nps
pub async fn record_nps(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<NpsRequest>,
) -> Result<(StatusCode, Json<NpsEvent>), ApiError> {
    let event = state.nps.record(
        &request.user_id,
        &request.user_email,
        &domain_id,
        request.score,
        request.reason,
        request.shared_with,
    )?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /v1/experience/:domain_id/nps
pub async fn nps_score(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<NpsSummary> {
    let period = query.days_or(state.funnels.default_period_days())?;
    Ok(Json(state.nps.score(&domain_id, period)))
}

/// GET /v1/experience/:domain_id/nps/follow-ups
pub async fn detractor_follow_ups(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Json<Vec<DetractorFollowUp>> {
    Json(state.nps.detractors_needing_follow_up(&domain_id))
}

/// POST /v1/experience/:domain_id/shares
pub async fn record_share(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Json(request): Json<ShareRequest>,
) -> Result<(StatusCode, Json<ShareEvent>), ApiError> {
    let event = state.sharing.record(
        &request.user_id,
        &domain_id,
        request.share_type,
        request.platform,
        request.recipient_count,
        request.context,
    )?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /v1/experience/:domain_id/shares
pub async fn sharing_activity(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<ShareActivity> {
    let period = query.days_or(state.funnels.default_period_days())?;
    Ok(Json(state.sharing.activity(&domain_id, period)))
}
