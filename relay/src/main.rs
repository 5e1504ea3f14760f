//! Service entry point.

use apt_relay::config::Config;
use apt_relay::error::{RelayError, RelayResult};
use apt_relay::index::PackageIndex;
use apt_relay::sources::SourceContext;
use apt_relay::sync::{self, SyncEvent};
use apt_relay::web::{self, AppState};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "apt-relay",
    version,
    about = "APT repository aggregated from heterogeneous remote sources"
)]
struct Cli {
    /// Configuration file path.
    #[arg(
        short,
        long,
        default_value = "apt-relay.json",
        env = "APT_RELAY_CONFIG"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the repository over HTTP.
    Serve {
        /// Bind address, overriding the configuration.
        #[arg(short, long)]
        bind: Option<String>,
        /// Run a full sync pass before serving.
        #[arg(long)]
        sync: bool,
    },
    /// Run one full sync pass and exit.
    Sync,
}

#[tokio::main]
async fn main() -> RelayResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    let index = PackageIndex::open(&config.database.url).await?;
    let ctx = SourceContext::new()?;

    match cli.command {
        Command::Sync => run_sync(&index, &ctx, &config).await,
        Command::Serve { bind, sync } => {
            if sync {
                run_sync(&index, &ctx, &config).await?;
            }
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let state = AppState::new(config, index, ctx)?;
            web::serve(state, &bind).await
        }
    }
}

async fn run_sync(
    index: &PackageIndex,
    ctx: &SourceContext,
    config: &Config,
) -> RelayResult<()> {
    info!("starting sync pass");
    let mut on_event = |event: SyncEvent<'_>| match event {
        SyncEvent::Ingested { source_id, entry } => {
            info!(
                source = source_id,
                package = entry.control.package().unwrap_or("?"),
                version = entry.control.version().unwrap_or("?"),
                architecture = entry.control.architecture().unwrap_or("?"),
                "indexed package"
            );
        }
        SyncEvent::Failed {
            source_id,
            artifact,
            error,
        } => {
            if matches!(error, RelayError::Duplicate) {
                debug!(source = source_id, artifact, "already indexed");
            } else {
                warn!(source = source_id, artifact, %error, "skipped artifact");
            }
        }
    };

    let summary = sync::sync_all(index, ctx, config, &mut on_event).await?;
    info!(
        pruned = summary.pruned,
        ingested = summary.ingested,
        failed = summary.failed,
        "sync pass finished"
    );
    Ok(())
}
