//! Badge, achievement and ranking REST endpoints.

use crate::rest::{ApiError, ApiResult, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use quality_core::badges::{
    AchievementEvent, AdminDomainMetrics, Badge, ExpertPerformanceMetrics, MetricSnapshot, Rarity,
    SpecialistPerformanceMetrics, UserBadges, UserContributionMetrics,
};
use quality_gamification::{BadgeProgress, LeaderboardEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metrics a caller submits for badge evaluation: either a raw snapshot or
/// one of the typed per-role views.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsInput {
    Snapshot(MetricSnapshot),
    Contribution(UserContributionMetrics),
    Expert(ExpertPerformanceMetrics),
    Specialist(SpecialistPerformanceMetrics),
    Admin(AdminDomainMetrics),
}

impl From<&MetricsInput> for MetricSnapshot {
    fn from(input: &MetricsInput) -> Self {
        match input {
            MetricsInput::Snapshot(snapshot) => snapshot.clone(),
            MetricsInput::Contribution(m) => MetricSnapshot::from(m),
            MetricsInput::Expert(m) => MetricSnapshot::from(m),
            MetricsInput::Specialist(m) => MetricSnapshot::from(m),
            MetricsInput::Admin(m) => MetricSnapshot::from(m),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckBadgesRequest {
    pub user_email: String,
    pub metrics: MetricsInput,
}

#[derive(Debug, Deserialize)]
pub struct MetricsRequest {
    pub metrics: MetricsInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckBadgesResponse {
    pub user_id: String,
    pub awarded: Vec<Badge>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub badge_type: String,
    /// Absent for criteria that have no direction.
    pub progress: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdatedResponse {
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CelebrationResponse {
    pub achievement_id: Uuid,
    pub updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

/// GET /v1/badges
pub async fn catalogue(State(state): State<AppState>) -> Json<Vec<Badge>> {
    Json(state.badges.catalogue().badges().to_vec())
}

/// GET /v1/badges/:badge_type
pub async fn badge_definition(
    State(state): State<AppState>,
    Path(badge_type): Path<String>,
) -> ApiResult<Badge> {
    state
        .badges
        .badge_definition(&badge_type)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown badge {badge_type}")))
}

/// GET /v1/users/:user_id/badges
pub async fn user_badges(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<UserBadges> {
    Json(state.badges.user_badges(&user_id))
}

/// POST /v1/users/:user_id/badges/check
pub async fn check_badges(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<CheckBadgesRequest>,
) -> Json<CheckBadgesResponse> {
    let snapshot = MetricSnapshot::from(&request.metrics);
    let awarded = state
        .badges
        .check_and_award(&user_id, &request.user_email, &snapshot);
    metrics::counter!("api.badge_checks").increment(1);
    Json(CheckBadgesResponse { user_id, awarded })
}

/// POST /v1/users/:user_id/next-badge
pub async fn next_badge(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<MetricsRequest>,
) -> Json<Option<BadgeProgress>> {
    let snapshot = MetricSnapshot::from(&request.metrics);
    Json(state.badges.next_badge_progress(&user_id, &snapshot))
}

/// POST /v1/users/:user_id/progress/:badge_type
pub async fn badge_progress(
    State(state): State<AppState>,
    Path((user_id, badge_type)): Path<(String, String)>,
    Json(request): Json<MetricsRequest>,
) -> ApiResult<ProgressResponse> {
    if state.badges.badge_definition(&badge_type).is_none() {
        return Err(ApiError::NotFound(format!("unknown badge {badge_type}")));
    }
    let snapshot = MetricSnapshot::from(&request.metrics);
    let progress = state.badges.badge_progress(&user_id, &badge_type, &snapshot);
    Ok(Json(ProgressResponse { badge_type, progress }))
}

/// GET /v1/users/:user_id/rarity
pub async fn rarity_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<BTreeMap<Rarity, usize>> {
    Json(state.badges.rarity_stats(&user_id))
}

/// GET /v1/users/:user_id/achievements
pub async fn unshown_achievements(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<AchievementEvent>> {
    Json(state.badges.unshown_achievements(&user_id))
}

/// POST /v1/achievements/:achievement_id/shown
pub async fn mark_celebration_shown(
    State(state): State<AppState>,
    Path(achievement_id): Path<Uuid>,
) -> Json<CelebrationResponse> {
    let updated = state.badges.mark_celebration_shown(achievement_id);
    Json(CelebrationResponse {
        achievement_id,
        updated,
    })
}

/// POST /v1/rankings/:domain_id
pub async fn update_rankings(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
) -> Json<UpdatedResponse> {
    let rankings = state.rankings.clone();
    // Sweeps hold a per-domain lock; keep them off the async workers.
    let updated = tokio::task::spawn_blocking(move || rankings.update_rankings(&domain_id))
        .await
        .unwrap_or_default();
    Json(UpdatedResponse { updated })
}

/// GET /v1/rankings/:domain_id
pub async fn leaderboard(
    State(state): State<AppState>,
    Path(domain_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<Vec<LeaderboardEntry>> {
    let limit = query.limit.unwrap_or(state.leaderboard_limit);
    Json(state.rankings.leaderboard(&domain_id, limit))
}
