//! face-bulk-admin CLI: admin HTTP server over a remote biometric backend.
//!
//! Settings come from `conf/settings.yaml` merged with the user override file
//! (see `--conf`). Backend credentials must be configured before `serve`.
//!
//! Logging: set `RUST_LOG=face_bulk_admin=info` (or `warn`, `debug`) to see
//! logs on stderr.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use face_bulk_admin::auth::{
    DEFAULT_RENEWAL_BUFFER_MINS, DEFAULT_TOKEN_LIFETIME_MINS, TokenProvider,
};
use face_bulk_admin::config::{AppConfig, load_runtime_settings, set_config_home_override};
use face_bulk_admin::gateway::{GatewayState, run_http};
use face_bulk_admin::jobs::BulkEngine;
use face_bulk_admin::pool::ChannelPool;
use face_bulk_admin::remote::BiometricGateway;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(conf_dir) = cli.conf.clone() {
        set_config_home_override(conf_dir);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("face_bulk_admin=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let settings = load_runtime_settings();
    let config = AppConfig::from_settings(settings).context("invalid configuration")?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.gateway.bind.clone());
            serve(config, &bind).await
        }
        Command::CheckConfig => {
            println!("configuration ok: backend endpoint {}", config.backend.endpoint);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, bind: &str) -> anyhow::Result<()> {
    let tokens = Arc::new(TokenProvider::new(
        &config.backend.client_id,
        &config.backend.signing_key_base64,
        config
            .backend
            .token_lifetime_mins
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_MINS),
        config
            .backend
            .token_renewal_buffer_mins
            .unwrap_or(DEFAULT_RENEWAL_BUFFER_MINS),
    )?);

    let pool = Arc::new(ChannelPool::new(
        &config.backend.endpoint,
        &config.backend.pool,
    )?);
    pool.spawn_health_loop(config.backend.pool.health_check_interval_secs);

    let backend = Arc::new(BiometricGateway::new(
        Arc::clone(&pool),
        tokens,
        config.backend.deadlines.clone(),
        &config.gateway.enrollment_base_url,
    ));
    let engine = BulkEngine::start(backend, config.bulk.clone());

    let state = GatewayState {
        engine,
        pool,
        default_link_validity_hours: config.gateway.link_validity_hours,
    };
    run_http(state, bind).await
}
