//! tezdel daemon: indexes Tezos delegations and serves them over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tezdel_node::{backfill, empty_store, init_logging, NodeConfig, ShutdownController, TezdelNode};

#[derive(Parser)]
#[command(name = "tezdel", about = "Tezos delegation indexer")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base;
    /// CLI flags and env vars override them.
    #[arg(long, env = "TEZDEL_CONFIG")]
    config: Option<PathBuf>,

    /// Upstream delegations endpoint.
    #[arg(long, env = "TEZDEL_API")]
    api: Option<String>,

    /// LMDB data directory.
    #[arg(long, env = "TEZDEL_DB")]
    db: Option<PathBuf>,

    /// Live polling interval in seconds.
    #[arg(long, env = "TEZDEL_SYNC_INTERVAL")]
    sync_interval: Option<u64>,

    /// Read API port.
    #[arg(long, env = "TEZDEL_PORT")]
    port: Option<u16>,

    /// Skip the historical backfill at startup.
    #[arg(long, env = "TEZDEL_NO_HISTORY")]
    no_history: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TEZDEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TEZDEL_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Backfill, poll and serve until SIGINT/SIGTERM.
    Run,
    /// Backfill a range into the store, then exit.
    Backfill {
        /// Inclusive lower bound (RFC3339). Defaults to the newest stored
        /// delegation.
        #[arg(long)]
        from: Option<String>,
        /// Exclusive upper bound (RFC3339). Defaults to now.
        #[arg(long)]
        to: Option<String>,
    },
    /// Delete every stored delegation.
    Empty,
}

impl Cli {
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let base = match &self.config {
            Some(path) => {
                let path = path.to_string_lossy();
                NodeConfig::from_toml_file(&path)
                    .with_context(|| format!("failed to load config {path}"))?
            }
            None => NodeConfig::default(),
        };

        Ok(NodeConfig {
            api: self.api.clone().unwrap_or(base.api),
            db_path: self.db.clone().unwrap_or(base.db_path),
            sync_interval_secs: self.sync_interval.unwrap_or(base.sync_interval_secs),
            port: self.port.unwrap_or(base.port),
            history: base.history && !self.no_history,
            log_level: self.log_level.clone().unwrap_or(base.log_level),
            log_format: self.log_format.clone().unwrap_or(base.log_format),
            ..base
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;
    config.validate().context("invalid configuration")?;
    init_logging(config.log_format()?, &config.log_level);

    match cli.command {
        Command::Run => {
            tracing::info!(
                api = %config.api,
                port = config.port,
                history = config.history,
                "starting tezdel"
            );
            let mut node = TezdelNode::new(config)?;
            node.run().await?;
            tracing::info!("tezdel exited cleanly");
        }
        Command::Backfill { from, to } => {
            let shutdown = Arc::new(ShutdownController::new());
            let signals = {
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move { shutdown.wait_for_signal().await })
            };
            let result = backfill(&config, from.as_deref(), to.as_deref(), &shutdown).await;
            signals.abort();
            result.context("backfill failed")?;
        }
        Command::Empty => {
            empty_store(&config).context("failed to empty store")?;
        }
    }

    Ok(())
}
