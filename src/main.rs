mod clock;
mod config;
mod error;
mod exec;
mod listing;
mod mcp;
mod scp;
mod security;
mod ssh;
mod state;
#[cfg(test)]
mod testing;
mod transport;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::clock::{Clock, SystemClock};
use crate::config::{ServerConfig, Transport};
use crate::mcp::McpSshService;
use crate::security::SecurityGate;
use crate::ssh::RusshConnector;
use crate::state::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Initialize tracing; stdout belongs to the protocol in stdio mode
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ssh_mcp=info,tower_http=info".into());
    match config.transport {
        Transport::Stdio => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        Transport::Http => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(SessionManager::new(config.session_expiry, clock.clone()));
    let security = Arc::new(SecurityGate::new(config.security.clone(), clock));
    sessions.start_sweeper(config.cleanup_interval);
    security.start_pruner(config.cleanup_interval, config.session_expiry);

    let service = Arc::new(McpSshService::new(
        sessions.clone(),
        security.clone(),
        Arc::new(RusshConnector),
    ));

    match config.transport {
        Transport::Http => {
            let listener = tokio::net::TcpListener::bind(config.bind)
                .await
                .with_context(|| format!("failed to bind {}", config.bind))?;
            tracing::info!("MCP server available at http://{}/mcp", config.bind);

            axum::serve(listener, mcp::http::router(service))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server failed")?;
        }
        Transport::Stdio => {
            tracing::info!("Serving MCP over stdio");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            tokio::select! {
                served = mcp::stdio::serve(&service, stdin, tokio::io::stdout()) => {
                    served.context("stdio transport failed")?;
                }
                _ = shutdown_signal() => {}
            }
        }
    }

    sessions.stop_sweeper();
    security.stop_pruner();
    let closed = sessions.close_all().await;
    tracing::info!(closed, "Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
