use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use fleetwatch_client::{BrowserSession, BrowserSessionConfig};
use fleetwatch_core::{Orchestrator, Settings, TracingPollerReporter};
use fleetwatch_server::routes;
use fleetwatch_server::state::AppState;

#[derive(Parser)]
#[command(name = "fleetwatch-server", version, about = "Fleet dashboard scraping API")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "FLEETWATCH_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "FLEETWATCH_PORT", default_value_t = 8000)]
    port: u16,

    /// Bearer token required by /reset and /refresh (open when unset)
    #[arg(long, env = "FLEETWATCH_ADMIN_TOKEN")]
    admin_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleetwatch=info".parse()?))
        .with_target(false)
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.admin_token.is_none() {
        tracing::warn!("FLEETWATCH_ADMIN_TOKEN not set, /reset and /refresh are open");
    }

    let remote = BrowserSession::new(BrowserSessionConfig::from_settings(&settings));
    let orchestrator = Orchestrator::new(remote, &settings);
    let poller = orchestrator.start(TracingPollerReporter);

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        admin_token: args.admin_token,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.stop().await;
    orchestrator.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
