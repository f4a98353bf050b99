use market_analysis_orchestrator::{agent::Orchestrator, api::start_server, config::AppConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    info!("Market Analysis Orchestrator - API Server");
    info!("Port: {}", config.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    // Connect up front so /providers reflects reality; sessions reconnect as needed.
    for attempt in orchestrator.manager().connect_all().await {
        match attempt.result {
            Ok(operations) => info!(
                provider = %attempt.provider,
                operations = operations.len(),
                "Provider ready"
            ),
            Err(e) => warn!(provider = %attempt.provider, error = %e, "Provider unavailable"),
        }
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            on_signal.cancel();
        }
    });

    let served = start_server(orchestrator.clone(), config.port, shutdown).await;

    for (provider, error) in orchestrator.manager().disconnect_all().await {
        warn!(provider = %provider, error = %error, "Provider did not shut down cleanly");
    }

    served
}
