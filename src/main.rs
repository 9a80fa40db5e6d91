//! Sentinel Federation Gateway
//!
//! Loads the gateway configuration, opens the state store and keeps the
//! expired-state cleanup running until shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use federation_gateway::saml::AcceptUnsigned;
use federation_gateway::state::{spawn_cleanup_task, RedbStateStore, StateStore};
use federation_gateway::{Gateway, GatewayConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "sentinel-federation-gateway")]
#[command(about = "SAML federation gateway authentication core")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "/etc/sentinel-federation/gateway.json", env = "GATEWAY_CONFIG")]
    config: PathBuf,

    /// Override the state store path from the configuration
    #[arg(long, env = "GATEWAY_STATE_STORE")]
    state_store: Option<PathBuf>,

    /// Print the SP metadata of a saml:SP source and exit
    #[arg(long, value_name = "SOURCE_ID")]
    sp_metadata: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "GATEWAY_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},federation_gateway={}",
            env!("CARGO_CRATE_NAME"),
            log_level,
            log_level
        ))
        .json()
        .init();

    info!("Starting Sentinel Federation Gateway");

    let mut config = GatewayConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(path) = args.state_store {
        config.state_store_path = path;
    }

    info!(
        base_url = %config.base_url,
        sources = config.sources.len(),
        filters = config.processing_filters.len(),
        signing = config.signing.is_some(),
        "Configuration loaded"
    );

    let store: Arc<dyn StateStore> = Arc::new(
        RedbStateStore::open(config.state_store_path.clone(), config.state_ttl_secs)
            .with_context(|| {
                format!(
                    "Failed to open state store {}",
                    config.state_store_path.display()
                )
            })?,
    );
    info!(path = %config.state_store_path.display(), "State store initialized");

    let base_dir = args.config.parent().unwrap_or(Path::new("."));
    warn!("SAML response signatures are not verified by this build; run behind a verifying front end");
    let gateway = Gateway::from_config(&config, base_dir, Arc::clone(&store), Arc::new(AcceptUnsigned))?;

    if let Some(source_id) = args.sp_metadata {
        println!("{}", gateway.sp_metadata(&source_id)?);
        return Ok(());
    }

    info!(
        sources = ?gateway.sources().ids().collect::<Vec<_>>(),
        "Gateway ready"
    );

    let cleanup = spawn_cleanup_task(Arc::clone(&store), config.cleanup_interval_secs);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    cleanup.abort();
    Ok(())
}
