//! journeyd - journey progress, automation and realtime service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use journey_core::{JourneyId, UserId};
use journey_progress::JourneyTracker;
use journey_realtime::Notifier;
use journey_server::config::ServerConfig;
use journey_server::{build_state, create_router, load_catalog, open_store};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "journeyd")]
#[command(about = "Journey progress, automation and realtime service", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "journeyd.toml")]
    config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(long, env = "JOURNEY_BIND")]
    bind: Option<SocketAddr>,

    /// Data directory (overrides config file)
    #[arg(long, env = "JOURNEY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Webhook HMAC secret (overrides config file)
    #[arg(long, env = "JOURNEY_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Journey template catalog (overrides config file)
    #[arg(long, env = "JOURNEY_TEMPLATES")]
    templates: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (default)
    Serve,
    /// List journey templates
    Templates,
    /// Print one user's journey as JSON
    Show {
        /// Journey template id
        journey_id: String,
        /// User id
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut config = ServerConfig::load_or_default(&cli.config)?;

    // Apply CLI overrides
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(secret) = cli.webhook_secret {
        config.webhooks.secret = Some(secret);
    }
    if let Some(templates) = cli.templates {
        config.webhooks.templates_path = Some(templates);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Templates => {
            let catalog = load_catalog(&config)?;
            println!("Journeys ({})", catalog.len());
            for template in catalog.iter() {
                let checkpoints: usize = template.phases.iter().map(|p| p.checkpoints.len()).sum();
                println!(
                    "  {} | {} phases | {} checkpoints - {}",
                    template.id,
                    template.phases.len(),
                    checkpoints,
                    template.name,
                );
            }
            Ok(())
        }
        Commands::Show {
            journey_id,
            user_id,
        } => {
            let store = open_store(&config).await?;
            let tracker = JourneyTracker::new(store, Arc::new(load_catalog(&config)?));
            let journey = tracker
                .load_journey(&UserId::new(user_id), &JourneyId::new(journey_id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&journey)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("journey=info").add_directive("tower_http=info".parse()?),
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting journeyd");
    info!("Storage: {:?} at {}", config.storage.backend, config.storage.data_dir.display());
    if config.webhooks.secret.is_none() {
        tracing::warn!("No webhook secret configured; signatures are not checked");
    }

    let state = build_state(&config).await?;
    let notifier = state.notifier().clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    info!("Listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(notifier))
        .await?;

    info!("journeyd stopped");
    Ok(())
}

/// Resolve on SIGINT/SIGTERM and close realtime streams so open
/// connections can finish.
async fn shutdown_signal(notifier: Notifier) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested");
    notifier.shutdown();
}
