//! awl-gateway - local REST gateway for WaterFurnace Symphony (AWL)

use std::sync::Arc;

use clap::Parser;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use awl_gateway::awl::{LogObserver, ReconnectSupervisor, SharedClient};
use awl_gateway::config::Args;
use awl_gateway::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("awl_gateway={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("configuration error: {}", e);
        std::process::exit(1);
    }

    info!("awl-gateway {}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}", args.listen);
    info!("account: {}", args.awl_username);

    let slot: SharedClient = Arc::new(RwLock::new(None));

    let supervisor = ReconnectSupervisor::new(
        &args.awl_username,
        &args.awl_password,
        args.client_config(),
        args.supervisor_config(),
        Arc::clone(&slot),
        Arc::new(LogObserver {
            warn_after: args.warn_after(),
        }),
    );
    let supervisor_task = supervisor.spawn();

    let state = Arc::new(AppState::new(args, Arc::clone(&slot)));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e}");
        }
    };
    server::run(Arc::clone(&state), shutdown).await?;

    // Orderly teardown: stop retrying, then log the session out
    supervisor_task.abort();
    if let Some(client) = state.client.read().await.as_ref() {
        client.close().await;
    }
    info!("shut down");
    Ok(())
}
