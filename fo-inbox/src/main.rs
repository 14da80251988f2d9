//! fo-inbox - Inbox ingestion service
//!
//! Watches a vault's inbox folder, runs every new file through the
//! enrichment pipeline and serves queue and ledger status over HTTP + SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fo_common::config::{load_or_default, resolve_root_folder, ROOT_FOLDER_ENV};
use fo_common::events::EventBus;
use fo_inbox::config::InboxSettings;
use fo_inbox::{AppState, Collaborators, Inbox};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 5780;

/// Command-line arguments for fo-inbox
#[derive(Parser, Debug)]
#[command(name = "fo-inbox")]
#[command(about = "Inbox ingestion pipeline for a notes vault")]
#[command(version)]
struct Args {
    /// Vault root folder (falls back to FO_ROOT_FOLDER, then the config file)
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "FO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the inbox and serve the HTTP API (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5780", env = "FO_INBOX_PORT")]
        port: u16,
    },
    /// Process every file currently in the inbox, then exit
    Backlog,
    /// Print the record ledger as JSON
    Records {
        /// Only records with errors
        #[arg(long)]
        errors: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the config file level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "fo_inbox={level},fo_common={level},tower_http={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, &config);
    tokio::fs::create_dir_all(&root_folder)
        .await
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let settings = InboxSettings::from_table(&config.inbox).context("Invalid [inbox] settings")?;
    let collaborators = Collaborators::offline(&settings);
    let event_bus = EventBus::new(100);

    let inbox = Inbox::open(&root_folder, settings, collaborators, event_bus)
        .await
        .context("Failed to open inbox")?;

    let command = args.command.unwrap_or_else(|| Command::Serve {
        port: std::env::var("FO_INBOX_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT),
    });
    match command {
        Command::Serve { port } => serve(inbox, port).await,
        Command::Backlog => run_backlog(inbox).await,
        Command::Records { errors } => print_records(inbox, errors).await,
    }
}

async fn serve(inbox: Inbox, port: u16) -> Result<()> {
    info!("Starting fo-inbox on port {}", port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    let watcher = inbox.spawn_watcher(shutdown.clone());

    let queued = inbox.process_backlog().await.context("Failed to queue inbox backlog")?;
    info!(queued, "Initial backlog queued");

    let app = fo_inbox::build_router(AppState::new(inbox.clone()));
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = watcher.await {
        warn!("Watcher task ended abnormally: {}", e);
    }
    inbox.shutdown().await.context("Failed to persist ledger")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_backlog(inbox: Inbox) -> Result<()> {
    let queued = inbox.process_backlog().await.context("Failed to queue inbox backlog")?;
    info!(queued, "Processing backlog");

    inbox.wait_until_settled().await;
    inbox.shutdown().await.context("Failed to persist ledger")?;

    let stats = inbox.stats();
    info!(
        completed = stats.queue.completed,
        bypassed = stats.queue.bypassed,
        errors = stats.queue.errors,
        "Backlog processed"
    );
    Ok(())
}

async fn print_records(inbox: Inbox, errors_only: bool) -> Result<()> {
    let records = if errors_only {
        inbox.ledger().records_with_errors()
    } else {
        inbox.ledger().all_records()
    };
    println!("{}", serde_json::to_string_pretty(&records)?);
    inbox.shutdown().await.context("Failed to persist ledger")?;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
