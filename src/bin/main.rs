use clap::Parser;
use market_analysis_orchestrator::{
    agent::Orchestrator, config::AppConfig, models::SessionRequest,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run one market analysis session and print the report as JSON
#[derive(Debug, Parser)]
#[command(name = "analyze", version)]
struct Args {
    /// Free-text question, e.g. "how are BTC and ETH looking this week?"
    #[arg(required = true)]
    query: Vec<String>,

    /// Target entity; repeat for several. Overrides extraction from the query.
    #[arg(short, long = "entity")]
    entities: Vec<String>,

    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Analysis failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;

    // Ctrl-C stops new steps; the session still synthesizes what it has.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing current step");
            on_signal.cancel();
        }
    });

    let request = SessionRequest {
        query: args.query.join(" "),
        entities: args.entities,
    };

    let outcome = orchestrator.run(request, cancel).await;

    for (provider, error) in orchestrator.manager().disconnect_all().await {
        warn!(provider = %provider, error = %error, "Provider did not shut down cleanly");
    }

    let session = outcome?;
    info!(session = %session.id, status = ?session.status, "Session complete");

    let report = if args.compact {
        serde_json::to_string(&session)?
    } else {
        serde_json::to_string_pretty(&session)?
    };
    println!("{}", report);

    Ok(())
}
