//! Quality Loop: funnel analytics, badges and experience tracking for the
//! feedback → evaluation → correction loop of a business chat platform.
//!
//! Main entry point that wires the services and starts the server.

use clap::Parser;
use quality_api::{ApiServer, AppState};
use quality_core::config::AppConfig;
use quality_gamification::BadgeCatalogue;
use quality_store::InMemoryStore;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "quality-loop")]
#[command(about = "Quality-loop analytics and gamification service")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "QUALITY_LOOP_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "QUALITY_LOOP__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "QUALITY_LOOP__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "QUALITY_LOOP__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// JSON badge catalogue (overrides config)
    #[arg(long, env = "QUALITY_LOOP__GAMIFICATION__CATALOGUE_PATH")]
    catalogue: Option<String>,

    /// JSON-lines funnel events to load before serving
    #[arg(long)]
    seed_events: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quality_loop=info,quality_api=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Quality Loop starting up");

    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(path) = cli.catalogue {
        config.gamification.catalogue_path = Some(path);
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        period_days = config.funnel.default_period_days,
        "Configuration loaded"
    );

    // A broken catalogue is a deployment error; refuse to start.
    let catalogue = BadgeCatalogue::load(config.gamification.catalogue_path.as_deref())?;
    info!(badges = catalogue.len(), "Badge catalogue ready");

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = cli.seed_events.as_deref() {
        match std::fs::read_to_string(path) {
            Ok(payload) => match store.import_funnel_events_json(&payload) {
                Ok(imported) => info!(path = %path, imported = imported, "Seed events loaded"),
                Err(e) => error!(error = %e, path = %path, "Failed to import seed events"),
            },
            Err(e) => error!(error = %e, path = %path, "Failed to read seed events"),
        }
    }

    let state = AppState::with_store(&config, catalogue, store);
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Quality Loop is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
