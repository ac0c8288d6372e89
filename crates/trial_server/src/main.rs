//! Trial Randomisation Server
//!
//! REST API server for sealed-list clinical-trial randomisation.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trial_server::config::{build_config, CliArgs as ConfigCliArgs, LogFormat, ServerConfig, StorageBackend};
use trial_server::fixtures::Fixtures;
use trial_server::server::Server;
use trial_store::memory::MemoryStore;
use trial_store::postgres::PgStore;
use trial_store::RandomisationService;

/// Trial Randomisation Server - REST API for sealed-list randomisation
#[derive(Parser, Debug)]
#[command(name = "trial_server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, value_name = "FILE", env = "TRIAL_CONFIG")]
    config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Storage backend (memory, postgres)
    #[arg(long)]
    backend: Option<String>,

    /// PostgreSQL connection string
    #[arg(long)]
    database_url: Option<String>,
}

impl From<Args> for ConfigCliArgs {
    fn from(args: Args) -> Self {
        ConfigCliArgs {
            config_file: args.config,
            host: args.host,
            port: args.port,
            log_level: args.log_level,
            log_format: args.log_format,
            backend: args.backend,
            database_url: args.database_url,
        }
    }
}

fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }
}

async fn memory_server(config: ServerConfig) -> anyhow::Result<Server> {
    let store = MemoryStore::new();
    if let Some(path) = &config.storage.fixtures {
        let fixtures = Fixtures::from_file(path)
            .with_context(|| format!("loading fixtures from {}", path.display()))?;
        fixtures.load_into(&store).await;
        tracing::info!(trials = fixtures.trials.len(), "Trial fixtures loaded");
    } else {
        tracing::warn!("Memory backend started without fixtures; no trial can be randomised");
    }

    let service = RandomisationService::with_settings(store, config.randomisation);
    Ok(Server::new(config, service))
}

async fn postgres_server(config: ServerConfig) -> anyhow::Result<Server> {
    let url = config
        .storage
        .database_url
        .as_deref()
        .context("storage.database_url is required for the postgres backend")?;
    let store = PgStore::connect(url, config.storage.max_connections)
        .await
        .context("connecting to PostgreSQL")?;

    if config.storage.run_migrations {
        store.migrate().await.context("running migrations")?;
        tracing::info!("Database migrations applied");
    }

    let service = RandomisationService::with_settings(store, config.randomisation);
    Ok(Server::new(config, service))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cli_args: ConfigCliArgs = args.into();
    let config = build_config(&cli_args)?;

    init_tracing(config.log_level.as_filter_str(), config.log_format);

    tracing::info!("Trial Randomisation Server v{}", trial_server::VERSION);
    tracing::info!(
        host = %config.host,
        port = %config.port,
        log_level = %config.log_level,
        environment = %config.environment,
        backend = %config.storage.backend,
        max_total_slots = config.randomisation.max_total_slots,
        preview_max_slots = config.randomisation.preview_max_slots,
        "Server configuration loaded"
    );

    let server = match config.storage.backend {
        StorageBackend::Memory => memory_server(config).await?,
        StorageBackend::Postgres => postgres_server(config).await?,
    };
    tracing::info!(address = %server.config().socket_addr(), "Starting server");

    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
