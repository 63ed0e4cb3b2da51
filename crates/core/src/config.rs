use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `QUALITY_LOOP__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub gamification: GamificationConfig,
    #[serde(default)]
    pub experience: ExperienceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            funnel: FunnelConfig::default(),
            gamification: GamificationConfig::default(),
            experience: ExperienceConfig::default(),
        }
    }
}

// ─── Funnel Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    #[serde(default = "default_period_days")]
    pub default_period_days: u32,
    /// Write the daily conversion snapshot after each computation.
    #[serde(default = "default_persist_snapshots")]
    pub persist_snapshots: bool,
}

fn default_period_days() -> u32 { 30 }
fn default_persist_snapshots() -> bool { true }

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            default_period_days: default_period_days(),
            persist_snapshots: default_persist_snapshots(),
        }
    }
}

// ─── Gamification Config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct GamificationConfig {
    /// JSON badge catalogue. The built-in catalogue is used when unset.
    #[serde(default)]
    pub catalogue_path: Option<String>,
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: usize,
    #[serde(default = "default_achievement_batch")]
    pub achievement_batch: usize,
}

fn default_leaderboard_limit() -> usize { 10 }
fn default_achievement_batch() -> usize { 5 }

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            catalogue_path: None,
            leaderboard_limit: default_leaderboard_limit(),
            achievement_batch: default_achievement_batch(),
        }
    }
}

// ─── Experience Config ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ExperienceConfig {
    #[serde(default = "default_csat_target")]
    pub csat_target: f64,
    #[serde(default = "default_csat_excellent")]
    pub csat_excellent: f64,
    #[serde(default = "default_csat_trend_band")]
    pub csat_trend_band: f64,
    #[serde(default = "default_nps_trend_band")]
    pub nps_trend_band: f64,
    #[serde(default = "default_nps_target")]
    pub nps_target: i32,
    #[serde(default = "default_follow_up_days")]
    pub follow_up_days: i64,
    #[serde(default = "default_survey_cooldown_hours")]
    pub survey_cooldown_hours: i64,
    #[serde(default = "default_top_sharers")]
    pub top_sharers: usize,
}

fn default_csat_target() -> f64 { 4.0 }
fn default_csat_excellent() -> f64 { 4.5 }
fn default_csat_trend_band() -> f64 { 0.2 }
fn default_nps_trend_band() -> f64 { 5.0 }
fn default_nps_target() -> i32 { 50 }
fn default_follow_up_days() -> i64 { 7 }
fn default_survey_cooldown_hours() -> i64 { 24 }
fn default_top_sharers() -> usize { 10 }

impl Default for ExperienceConfig {
    fn default() -> Self {
        Self {
            csat_target: default_csat_target(),
            csat_excellent: default_csat_excellent(),
            csat_trend_band: default_csat_trend_band(),
            nps_trend_band: default_nps_trend_band(),
            nps_target: default_nps_target(),
            follow_up_days: default_follow_up_days(),
            survey_cooldown_hours: default_survey_cooldown_hours(),
            top_sharers: default_top_sharers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, then environment
    /// variables (which take precedence).
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::debug!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("QUALITY_LOOP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.funnel.default_period_days, 30);
        assert!(config.funnel.persist_snapshots);
        assert_eq!(config.gamification.leaderboard_limit, 10);
        assert!(config.gamification.catalogue_path.is_none());
        assert_eq!(config.experience.nps_target, 50);
        assert_eq!(config.experience.follow_up_days, 7);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"node_id": "node-07", "experience": {"csat_target": 4.2}}"#,
        )
        .unwrap();
        assert_eq!(config.node_id, "node-07");
        assert_eq!(config.experience.csat_target, 4.2);
        assert_eq!(config.experience.csat_trend_band, 0.2);
        assert_eq!(config.metrics.port, 9091);
    }
}
