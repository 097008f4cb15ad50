//! kwin-marionette - GUI automation MCP server for isolated KWin Wayland sessions
//!
//! Serves MCP over stdio. Each session_start spawns a private compositor that
//! is torn down on session_stop or when the server exits.

use clap::Parser;
use kwin_marionette::config::ServerConfig;
use kwin_marionette::server::MarionetteServer;
use rmcp::ServiceExt;
use rmcp::transport::io::stdio;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    // stderr keeps stdout clean for the MCP protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(compositor = %config.compositor, "Starting kwin-marionette MCP server");

    let server = MarionetteServer::new(&config);
    let handle = server.clone();

    let service = server.serve(stdio()).await?;
    tracing::info!("kwin-marionette ready, listening on stdio");

    service.waiting().await?;

    tracing::info!("kwin-marionette shutting down");
    handle.shutdown().await;
    Ok(())
}
