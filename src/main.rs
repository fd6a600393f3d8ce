//! EVM committer command line
//!
//! Connects to the configured node pool and runs one operation: inspect the
//! ring, inspect the sender's nonce, commit a futures payload, or dump
//! metrics.

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Bytes;
use evm_committer::committer::{EthCommitter, EvmCommitter};
use evm_committer::config::Config;
use evm_committer::metrics::{self, PrometheusTelemetry, Telemetry};
use evm_committer::rpc_manager::{EthProvider, EthersDialer, EvmProvider};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the nodes currently in the ring and the chain id
    Nodes,
    /// Show the pending and cached nonce of the sending account
    Nonce,
    /// Send a hex payload to the futures contract
    CommitFutures {
        /// Calldata, hex encoded
        #[arg(long)]
        data: String,
    },
    /// Probe the pool once and print collected metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_exists = std::path::Path::new(&args.config).exists();
    let config = if config_exists {
        Config::from_file_with_env(&args.config)
            .with_context(|| format!("Failed to load config from {}", args.config))?
    } else {
        Config::from_env().context("Failed to load config from environment")?
    };

    init_logging(args.verbose, args.json_logs || config.monitoring.json_logs)?;
    if !config_exists {
        warn!(path = %args.config, "Config file not found, using environment");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "Starting EVM committer");

    let prometheus = if config.monitoring.enable_metrics {
        Some(Arc::new(PrometheusTelemetry::new()?))
    } else {
        None
    };
    let telemetry: Arc<dyn Telemetry> = match &prometheus {
        Some(p) => p.clone() as Arc<dyn Telemetry>,
        None => metrics::noop(),
    };

    let provider =
        EthProvider::connect(config.rpc.clone(), Arc::new(EthersDialer), telemetry.clone())
            .await
            .context("Failed to create EVM provider")?;

    let result = tokio::select! {
        result = run(&args.command, &config, provider.clone(), telemetry, prometheus) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };
    provider.close().await;
    result
}

async fn run(
    command: &Command,
    config: &Config,
    provider: Arc<EthProvider>,
    telemetry: Arc<dyn Telemetry>,
    prometheus: Option<Arc<PrometheusTelemetry>>,
) -> Result<()> {
    match command {
        Command::Nodes => {
            println!("chain id: {}", provider.chain_id());
            for node in provider.nodes() {
                println!("{}", node);
            }
        }
        Command::Nonce => {
            let committer = build_committer(config, provider.clone(), telemetry).await?;
            let from = committer.from_address();
            let pending = provider.pending_nonce(from).await?;
            println!("account: {:?}", from);
            println!("pending nonce: {}", pending);
            println!("cached nonce: {}", committer.nonce_cache().get(from));
        }
        Command::CommitFutures { data } => {
            let payload = hex::decode(data.trim_start_matches("0x"))
                .context("--data must be hex encoded")?;
            let committer = build_committer(config, provider, telemetry).await?;
            let tx_hash = committer.commit_futures_tx(Bytes::from(payload)).await?;
            info!(tx_hash = ?tx_hash, "Futures transaction committed");
            println!("{:?}", tx_hash);
        }
        Command::Metrics => {
            let prometheus = prometheus.context("metrics are disabled in the configuration")?;
            if let Err(err) = provider.block_number().await {
                warn!(error = %err, "Probe call failed");
            }
            print!("{}", prometheus.export()?);
        }
    }
    Ok(())
}

async fn build_committer(
    config: &Config,
    provider: Arc<EthProvider>,
    telemetry: Arc<dyn Telemetry>,
) -> Result<EthCommitter> {
    let key = config.committer.key_source()?;
    let committer = EthCommitter::new(
        key,
        config.contracts,
        provider,
        config.committer.settings.clone(),
        telemetry,
    )
    .await
    .context("Failed to init EVM committer")?;
    Ok(committer)
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "evm_committer=debug,info"
    } else {
        "evm_committer=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    Ok(())
}
