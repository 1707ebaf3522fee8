//! kcp Init Agent
//!
//! Initializes new kcp workspaces. For every InitTarget it watches the
//! initializing virtual workspace of the referenced WorkspaceType, creates
//! the manifests rendered from the target's InitTemplates in each new
//! workspace and then removes its initializer so the workspace becomes
//! ready.

mod backoff;
mod config;
mod controller;
mod error;
mod initcontroller;
mod manifest;
mod selector;
mod source;
mod targetcontroller;
mod topology;
mod watcher;

#[cfg(test)]
mod test_utils;

use anyhow::{Context, Result};
use config::{Config, LogFormat};
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_workspace = %config.config_workspace,
        target_selector = %config.target_selector,
        "Starting Init Agent"
    );

    let kube_config = kube::Config::infer()
        .await
        .context("failed to load kubeconfig")?;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(token.clone()));

    let controller = Controller::new(&config, kube_config, token).await?;
    controller.run().await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutting down");
    token.cancel();
}
