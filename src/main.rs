//! kvstore - A Networked Key-Value Store with TTL Expiration
//!
//! This is the main entry point for the kvstore server.
//! It sets up the TCP listener, the store, and handles incoming connections.

use clap::Parser;
use kvstore::commands::CommandHandler;
use kvstore::connection::{handle_connection, ConnectionStats};
use kvstore::storage::{ExpirationWatcher, Store, StoreConfig, WatcherConfig, DEFAULT_AUTOSAVE_PATH};
use kvstore::{DEFAULT_HOST, DEFAULT_PORT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Parser, Debug)]
#[command(name = "kvstore", version, about = "In-memory key-value store with TTL expiration")]
struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// File written by the `autosave` command
    #[arg(long, value_name = "FILE", default_value = DEFAULT_AUTOSAVE_PATH)]
    autosave_path: PathBuf,

    /// Milliseconds between expiration sweeps
    #[arg(long, default_value_t = 1000)]
    expiry_interval_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
kvstore v{} - In-Memory Key-Value Store with TTL Expiration
──────────────────────────────────────────────────────────────
Server started on {}
Autosave file: {}

Use Ctrl+C to shutdown gracefully.
"#,
        kvstore::VERSION,
        config.bind_address(),
        config.autosave_path.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))?,
        )
        .with_target(false)
        .init();

    print_banner(&config);

    // Shared by every connection, the watcher and the autosave loop
    let store = Arc::new(Store::with_config(StoreConfig {
        autosave_path: config.autosave_path.clone(),
    }));

    let _watcher = ExpirationWatcher::start(
        Arc::clone(&store),
        WatcherConfig {
            interval: Duration::from_millis(config.expiry_interval_ms.max(1)),
        },
    );

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "Listening");

    tokio::select! {
        _ = accept_loop(listener, store, stats) => {}
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, store: Arc<Store>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&store));
                let stats = Arc::clone(&stats);

                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
