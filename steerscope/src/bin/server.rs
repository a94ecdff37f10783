//! Dashboard server binary

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use steerscope::api::{create_router, ApiState};
use steerscope::{NeuronpediaClient, ScopeConfig};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "steerscope.toml".to_string());

    let config = ScopeConfig::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path))?
        .with_env_overrides();

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Steerscope server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = config_path,
        api_base_url = config.api_base_url,
        steer_model = config.steer.model_id,
        microscope_model = config.microscope.model_id,
        session_idle_secs = config.server.session_idle_secs,
        "Loaded configuration"
    );
    if config.api_key.is_empty() {
        warn!("No API key configured (set NEURONPEDIA_API_KEY)");
    }

    let client = NeuronpediaClient::new(&config).context("Failed to build Neuronpedia client")?;
    let state = Arc::new(ApiState::with_session_idle(
        Arc::new(client),
        config.steer.model_id.clone(),
        Duration::from_secs(config.server.session_idle_secs),
    ));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on {}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
