//! Switchboard: one MCP endpoint fanning out to many upstream servers

mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sb_proxy::bridge::StdioBridge;
use sb_proxy::{DefaultTransportFactory, ProxyStore};
use sb_types::AppResult;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "switchboard", version, about = "Virtual MCP server multiplexer")]
struct Cli {
    /// Path to the proxy document (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port
        #[arg(long, default_value_t = 3900)]
        port: u16,
    },

    /// Serve one proxy over stdio for clients that cannot speak HTTP
    Stdio {
        /// Id of the proxy to serve
        proxy_id: String,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; in stdio mode stdout belongs to the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => sb_config::default_config_path()?,
    };

    let store = Arc::new(ProxyStore::new(
        config_path,
        Arc::new(DefaultTransportFactory::new()),
    ));
    store.load().await?;

    match cli.command {
        Command::Serve { host, port } => serve(store, &host, port).await,
        Command::Stdio { proxy_id } => {
            let bridge = StdioBridge::new(&store, &proxy_id).await?;
            bridge.run().await
        }
    }
}

async fn serve(store: Arc<ProxyStore>, host: &str, port: u16) -> AppResult<()> {
    let state = AppState::new(store.clone());
    let app = routes::router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Switchboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Upstream processes must not outlive us
    store.close_all().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        return;
    }
    info!("Received ctrl-c, shutting down");
}
