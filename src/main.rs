use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::Region;
use aws_credential_types::Credentials;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod models;
mod services;

use config::SyncConfig;
use services::{
    cdn::{Cdn, CloudFrontCdn},
    decision::Uploader,
    executor::GatewayExecutor,
    object_store::{ObjectStore, S3ObjectStore},
    planner::{PlanOptions, Planner},
    scheduler::Scheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = SyncConfig::from_env_and_args()?;
    tracing::debug!("Starting s3-sync with config: {:?}", cfg);
    if cfg.dry_run {
        tracing::info!("Dry run: no changes will be written");
    }

    // --- Cancellation: Ctrl-C and optional timeout ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling pending jobs");
                cancel.cancel();
            }
        });
    }
    if let Some(timeout) = cfg.timeout {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!("Timed out after {:?}, cancelling pending jobs", timeout);
            cancel.cancel();
        });
    }

    // --- Gateways ---
    let shared = load_sdk_config(&cfg).await;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(
        &shared,
        cfg.bucket.clone(),
        cfg.endpoint.as_deref(),
        cfg.path_style,
        cfg.checksum,
    ));
    let cdn = cfg
        .cloudfront_distribution
        .as_deref()
        .map(|id| Arc::new(CloudFrontCdn::new(&shared, id)) as Arc<dyn Cdn>);

    // --- Plan ---
    let planner = Planner::new(store.clone(), PlanOptions::from(&cfg));
    let plan = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("cancelled while creating sync jobs"),
        plan = planner.build() => plan.context("error while creating sync jobs")?,
    };

    if plan.is_empty() {
        tracing::info!("Nothing to synchronize");
        return Ok(());
    }

    // --- Execute ---
    tracing::info!("Synchronizing with bucket \"{}\"", cfg.bucket);
    let uploader = Uploader::new(store.clone(), Arc::new(cfg.policies.clone()), cfg.dry_run);
    let executor = Arc::new(GatewayExecutor::new(store, uploader, cdn, cfg.dry_run));
    if let Err(err) = Scheduler::new(cfg.max_concurrency)
        .run(plan, executor, cancel)
        .await
    {
        if err.is_cancelled() {
            tracing::warn!("Synchronization cancelled before completion");
        }
        return Err(err).context("error while running jobs");
    }

    tracing::info!("Synchronization complete");
    Ok(())
}

/// Shared AWS config: region, plus static credentials when both keys are set.
async fn load_sdk_config(cfg: &SyncConfig) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(cfg.region.clone()));
    if let Some(creds) = &cfg.credentials {
        loader = loader.credentials_provider(Credentials::new(
            creds.access_key.clone(),
            creds.secret_key.clone(),
            None,
            None,
            "s3-sync",
        ));
    }
    loader.load().await
}
