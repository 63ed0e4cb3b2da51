//! API server: the REST router plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::{experience_rest as experience, gamification_rest as gamification};
use axum::routing::{get, post};
use axum::Router;
use quality_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Every REST route with its middleware, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Funnels
        .route("/v1/funnel-events/:domain_id", post(rest::record_funnel_event))
        .route("/v1/funnels/:domain_id", get(rest::funnel_summary))
        .route("/v1/funnels/:domain_id/:funnel_type/rates", get(rest::conversion_rates))
        .route("/v1/funnels/:domain_id/:funnel_type/bottlenecks", get(rest::bottlenecks))
        .route("/v1/funnels/:domain_id/:funnel_type/report", get(rest::latest_report))
        .route("/v1/funnels/:domain_id/:funnel_type/history", get(rest::report_history))
        .route(
            "/v1/funnels/:domain_id/:funnel_type/snapshots/:date",
            get(rest::daily_snapshot),
        )
        .route(
            "/v1/milestones/:domain_id",
            get(rest::milestone_times).post(rest::record_milestone),
        )
        // Badges and rankings
        .route("/v1/badges", get(gamification::catalogue))
        .route("/v1/badges/:badge_type", get(gamification::badge_definition))
        .route("/v1/users/:user_id/badges", get(gamification::user_badges))
        .route("/v1/users/:user_id/badges/check", post(gamification::check_badges))
        .route("/v1/users/:user_id/next-badge", post(gamification::next_badge))
        .route("/v1/users/:user_id/progress/:badge_type", post(gamification::badge_progress))
        .route("/v1/users/:user_id/rarity", get(gamification::rarity_stats))
        .route("/v1/users/:user_id/achievements", get(gamification::unshown_achievements))
        .route(
            "/v1/achievements/:achievement_id/shown",
            post(gamification::mark_celebration_shown),
        )
        .route(
            "/v1/rankings/:domain_id",
            get(gamification::leaderboard).post(gamification::update_rankings),
        )
        // Experience
        .route(
            "/v1/experience/:domain_id/csat",
            get(experience::csat_summary).post(experience::record_csat),
        )
        .route("/v1/experience/:domain_id/csat/survey", post(experience::csat_survey))
        .route(
            "/v1/experience/:domain_id/nps",
            get(experience::nps_score).post(experience::record_nps),
        )
        .route("/v1/experience/:domain_id/nps/follow-ups", get(experience::detractor_follow_ups))
        .route(
            "/v1/experience/:domain_id/shares",
            get(experience::sharing_activity).post(experience::record_share),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Install the Prometheus recorder and serve it on the metrics port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
