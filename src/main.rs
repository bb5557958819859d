// tenant-relay - tenant-isolating streaming relay for agent runtimes
//
// This binary sits behind an authorizing gateway and in front of a managed
// agent runtime. Each invocation is checked against the caller's verified
// tenant identity, optionally re-signed with a tenant-scoped credential, and
// streamed back to the caller as NDJSON.
//
// Architecture:
// - Config: env > ~/.config/tenant-relay/config.toml > defaults
// - Proxy server (axum): ingress routes and the invocation pipeline
// - Credentials: ambient AWS identity or an STS session scoped per tenant
// - Audit: one record per invocation, persisted to S3 or a local directory

use anyhow::{bail, Result};
use clap::Parser;
use tenant_relay::cli::{Action, Cli};
use tenant_relay::config::Config;
use tenant_relay::logging;
use tenant_relay::proxy::{start_proxy, ProxyState};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first; config subcommands exit early
    let strict = match Cli::parse().dispatch()? {
        Action::Serve { strict } => strict,
        Action::Exit => return Ok(()),
    };

    let config = Config::from_env()?;

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging)?;

    tracing::info!(version = tenant_relay::config::VERSION, "Starting tenant-relay");

    let issues = config.validate();
    for issue in &issues {
        tracing::warn!("Configuration issue: {}", issue);
    }
    if strict && !issues.is_empty() {
        bail!(
            "Refusing to start with {} configuration issue(s) in strict mode",
            issues.len()
        );
    }

    let state = ProxyState::from_config(config).await?;
    start_proxy(state, shutdown_signal()).await
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
