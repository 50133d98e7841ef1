//! `serve` command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::core::config::AppConfig;
use crate::utils::logging::init_tracing;
use crate::AppState;

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Bind address (overrides configuration)
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides configuration and PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Path to a configuration file
    #[arg(short, long, env = "MEDIA_FETCH_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Configuration for `serve`: file and environment layers, then flags
pub fn resolve_config(args: &ServeArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub async fn handle(args: ServeArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    init_tracing(&config.logging);

    info!(
        "Starting {} v{} on {}",
        crate::NAME,
        crate::VERSION,
        config.bind_addr()
    );

    let state = AppState::new(config)?;
    crate::api::serve(state).await
}
