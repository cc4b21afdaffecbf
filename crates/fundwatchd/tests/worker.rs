use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fundwatch_config::{PublishConfig, ValidationConfig};
use fundwatch_infer::MockProvider;
use fundwatchd::extractor::AiExtractor;
use fundwatchd::fetcher::{DocumentFetcher, FetchError};
use fundwatchd::persist::Persistor;
use fundwatchd::pipeline::{Pipeline, PipelineSettings, Trigger};
use fundwatchd::publish::Publisher;
use fundwatchd::scheduler::{SharedState, run_queue, spawn_worker};
use tempfile::tempdir;

struct EmptyFetcher;

#[async_trait]
impl DocumentFetcher for EmptyFetcher {
    async fn fetch(&self, _locator: &str) -> Result<String, FetchError> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn worker_records_last_result_and_returns_to_idle() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let pipeline = Pipeline::new(
        Arc::new(EmptyFetcher),
        Arc::new(AiExtractor::new(Arc::new(MockProvider::default()), 1_000)),
        Persistor::new(temp.path().join("congressData.json")),
        Publisher::new(PublishConfig {
            enabled: false,
            ..PublishConfig::default()
        }),
        PipelineSettings {
            source_url: "https://origin.invalid/congress".to_owned(),
            noise_threshold: 1_000,
            validation: ValidationConfig {
                min_regions: 1,
                min_records: 1,
                min_total_amount: 1,
            },
            updates_enabled: true,
        },
    );

    let state = SharedState::default();
    let (queue, receiver) = run_queue(2);
    let worker = spawn_worker(Arc::new(pipeline), receiver, state.clone());

    queue.submit(Trigger::Manual)?;

    let last = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let guard = state.read().await;
                if let Some(result) = &guard.last_result
                    && !guard.is_running()
                {
                    return result.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;

    // The mock extraction is empty, so the plausibility gate rejects it.
    assert!(!last.success);
    assert_eq!(last.trigger, Trigger::Manual);
    assert_eq!(
        last.error.map(|failure| failure.kind),
        Some("validation".to_owned())
    );

    drop(queue);
    tokio::time::timeout(Duration::from_secs(5), worker).await??;
    Ok(())
}
