// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tracing_subscriber::EnvFilter;
use turnguard::api;
use turnguard::config;
use turnguard::turn;

use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "turnguard", about = "Chat turn mediator")]
struct Cli {
    /// Path to the turnguard.yaml config file
    #[arg(long, default_value = "turnguard.yaml", env = "TURNGUARD_CONFIG")]
    config: String,

    /// Port to listen on (overrides server.port)
    #[arg(long, env = "TURNGUARD_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        config_hash = %config.config_hash,
        counter_store = if config.rate_limit.redis_url.is_some() { "redis" } else { "memory" },
        secondary_safety = config.safety.secondary.is_some(),
        strict_model_selection = config.routing.strict_model_selection,
        "config loaded"
    );

    let orchestrator = match turn::build_orchestrator(&config) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to build turn orchestrator");
            std::process::exit(1);
        }
    };

    let app = api::build_router(orchestrator);

    let addr = SocketAddr::new(config.server.bind, cli.port.unwrap_or(config.server.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "turnguard listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
