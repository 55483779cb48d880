// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ecr_pull_secret_operator::config::Config;
use ecr_pull_secret_operator::kubernetes::{
    report_existing_requests, wait_for_request_crd, SecretCredentialSource,
};
use ecr_pull_secret_operator::reconcilers::PullSecretRequestWatcher;
use ecr_pull_secret_operator::registry::{CredentialSource, EcrTokenEndpoint, TokenCache};
use ecr_pull_secret_operator::sync::{ClusterTarget, Scheduler, SyncManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting ECR pull secret operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: registry={}, region={}, refresh_interval={:?}, workers={}",
        config.registry, config.region, config.refresh_interval, config.worker_count
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for PullSecretRequest CRD to become available...");
    wait_for_request_crd(&client).await?;

    let credentials = Arc::new(SecretCredentialSource::new(client.clone(), &config));
    match credentials.get_credentials().await {
        Ok(creds) => info!(
            "AWS credentials available (access key {})",
            creds.redacted_access_key()
        ),
        Err(e) => warn!(
            "AWS credentials not readable from {}: {}; token exchanges will fail until they are",
            credentials.location(),
            e
        ),
    }

    report_existing_requests(&client).await;

    let cache = Arc::new(TokenCache::new(
        credentials,
        Arc::new(EcrTokenEndpoint::new()),
        config.token_safety_margin,
        config.api_timeout,
    ));
    let target = Arc::new(ClusterTarget::new(client.clone(), &config));

    // Create the sync manager and get a handle for the producers
    let (sync_manager, sync_handle) = SyncManager::new(config.clone(), cache, target);
    let manager = tokio::spawn(sync_manager.run());

    let watcher = PullSecretRequestWatcher::new(client, sync_handle.clone());
    let scheduler = Scheduler::new(config.refresh_interval, sync_handle);

    info!("Starting watcher and refresh scheduler...");

    // Producers own the only handles; dropping them lets the manager drain
    tokio::select! {
        result = watcher.run() => {
            warn!("PullSecretRequest watcher stopped unexpectedly");
            result?;
        }
        result = scheduler.run() => {
            warn!("Refresh scheduler stopped unexpectedly");
            result?;
        }
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    manager.await??;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
