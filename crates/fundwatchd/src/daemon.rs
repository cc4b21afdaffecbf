use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fundwatch_config::FundwatchConfig;
use fundwatch_core::{Secret, Snapshot};
use fundwatch_infer::ProviderOverrides;
use serde_json::{Value, json};

use crate::persist::Persistor;
use crate::pipeline::{Pipeline, RunResult, Trigger};
use crate::scheduler::{DEFAULT_QUEUE_CAPACITY, SharedState, run_queue, spawn_worker, start_cron};
use crate::server::{AppState, router};

/// Scheduler, run worker and HTTP server until Ctrl-C.
pub async fn serve(
    workspace: &Path,
    config: FundwatchConfig,
    overrides: ProviderOverrides,
    bind: Option<String>,
) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(workspace, &config, overrides)?);
    let persistor = pipeline.persistor().clone();
    let scheduler_state = SharedState::default();

    let (queue, receiver) = run_queue(DEFAULT_QUEUE_CAPACITY);
    let worker = spawn_worker(pipeline, receiver, scheduler_state.clone());

    let mut cron = if config.schedule.enabled {
        Some(start_cron(queue.clone(), &config.schedule.cron).await?)
    } else {
        tracing::info!("scheduled updates disabled");
        None
    };

    if config.schedule.enabled && config.schedule.run_on_startup {
        queue
            .submit(Trigger::Startup)
            .context("failed to queue startup run")?;
    }

    let api_key = Secret::from_env(&config.server.api_key_env);
    if api_key.is_none() {
        tracing::warn!(
            env = %config.server.api_key_env,
            "no update API key configured, manual triggers will be rejected"
        );
    }

    let app = router(AppState {
        queue,
        scheduler: scheduler_state,
        persistor,
        api_key,
    });

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(
        addr = %listener.local_addr().context("failed to read bound address")?,
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with error")?;

    if let Some(cron) = cron.as_mut()
        && let Err(err) = cron.shutdown().await
    {
        tracing::warn!(error = %err, "failed to stop scheduler");
    }
    worker.abort();
    tracing::info!("shut down");
    Ok(())
}

pub async fn run_once(
    workspace: &Path,
    config: &FundwatchConfig,
    overrides: ProviderOverrides,
) -> Result<RunResult> {
    let pipeline = Pipeline::from_config(workspace, config, overrides)?;
    Ok(pipeline.run(Trigger::Cli).await)
}

/// Summary of the current snapshot, or `None` before the first successful run.
pub fn snapshot_summary(workspace: &Path, config: &FundwatchConfig) -> Result<Option<Value>> {
    let persistor = Persistor::new(workspace.join(&config.storage.snapshot_path));
    let snapshot = persistor
        .load_current()
        .context("failed to read current snapshot")?;
    Ok(snapshot.as_ref().map(summary))
}

pub fn summary(snapshot: &Snapshot) -> Value {
    json!({
        "lastUpdated": snapshot.retrieved_at,
        "totalStates": snapshot.region_count,
        "totalCongresspeople": snapshot.record_count,
        "totalMoney": snapshot.total_amount,
        "source": snapshot.source_locator,
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
