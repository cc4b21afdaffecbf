use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use fundwatch_config::{ExtractionProviderKind, FundwatchConfig, ValidationConfig};
use fundwatch_core::{ChangeReport, Snapshot, SnapshotStats};
use fundwatch_infer::{ProviderOverrides, load_provider};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::aggregate;
use crate::diff::diff;
use crate::extractor::{AiExtractor, ExtractionError, Extractor};
use crate::fetcher::{DocumentFetcher, FetchError, HttpFetcher};
use crate::lock::RunLock;
use crate::markup::MarkupExtractor;
use crate::persist::{PersistError, Persistor};
use crate::publish::Publisher;
use crate::validate::{ValidationError, validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Schedule,
    Startup,
    Manual,
    Cli,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Startup => "startup",
            Self::Manual => "manual",
            Self::Cli => "cli",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("updates are disabled by configuration")]
    Disabled,
    #[error("another run holds the lock for {0}")]
    Busy(PathBuf),
    #[error("failed to acquire run lock: {0}")]
    Lock(#[source] io::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("validation failed [{}]: {}", .0.check(), .0)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Busy(_) => "busy",
            Self::Lock(_) => "lock",
            Self::Fetch(_) => "network",
            Self::Extraction(_) => "extraction",
            Self::Validation(_) => "validation",
            Self::Persist(_) => "persistence",
            Self::Task(_) => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: String,
    pub message: String,
}

/// Outcome of one pipeline run. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SnapshotStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
}

impl RunResult {
    fn failed(trigger: Trigger, err: &PipelineError) -> Self {
        Self {
            success: false,
            error: Some(RunFailure {
                kind: err.kind().to_owned(),
                message: err.to_string(),
            }),
            stats: None,
            changes: None,
            committed: None,
            publish_error: None,
            backup: None,
            trigger,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source_url: String,
    pub noise_threshold: u64,
    pub validation: ValidationConfig,
    pub updates_enabled: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &FundwatchConfig) -> Self {
        Self {
            source_url: config.source.url.clone(),
            noise_threshold: config.diff.noise_threshold,
            validation: config.validation.clone(),
            updates_enabled: config.schedule.enabled,
        }
    }
}

struct Persisted {
    stats: SnapshotStats,
    changes: ChangeReport,
    backup: Option<PathBuf>,
    publish: Result<bool, String>,
}

/// Fetch, extract, aggregate, validate, diff, persist, publish.
pub struct Pipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    extractor: Arc<dyn Extractor>,
    persistor: Persistor,
    publisher: Publisher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        extractor: Arc<dyn Extractor>,
        persistor: Persistor,
        publisher: Publisher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            persistor,
            publisher,
            settings,
        }
    }

    pub fn from_config(
        workspace: &Path,
        config: &FundwatchConfig,
        overrides: ProviderOverrides,
    ) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::from_config(&config.source).context("failed to build fetcher")?;

        let provider_kind = overrides.provider.unwrap_or(config.extraction.provider);
        let extractor: Arc<dyn Extractor> = if provider_kind == ExtractionProviderKind::Markup {
            Arc::new(MarkupExtractor::new().context("failed to compile markup patterns")?)
        } else {
            let loaded = load_provider(&config.extraction, overrides)
                .context("failed to load extraction provider")?;
            tracing::info!(
                provider = %loaded.provider_name,
                model = %loaded.model_name,
                "extraction provider ready"
            );
            Arc::new(AiExtractor::new(
                Arc::from(loaded.provider),
                config.extraction.max_document_chars,
            ))
        };

        Ok(Self::new(
            Arc::new(fetcher),
            extractor,
            Persistor::new(workspace.join(&config.storage.snapshot_path)),
            Publisher::new(config.publish.clone()),
            PipelineSettings::from_config(config),
        ))
    }

    pub fn persistor(&self) -> &Persistor {
        &self.persistor
    }

    pub async fn run(&self, trigger: Trigger) -> RunResult {
        tracing::info!(trigger = trigger.as_str(), "pipeline run starting");

        match self.execute().await {
            Ok(persisted) => {
                let (committed, publish_error) = match persisted.publish {
                    Ok(committed) => (committed, None),
                    Err(message) => (false, Some(message)),
                };
                tracing::info!(
                    trigger = trigger.as_str(),
                    regions = persisted.stats.region_count,
                    records = persisted.stats.record_count,
                    total = persisted.stats.total_amount,
                    committed,
                    "pipeline run succeeded"
                );
                RunResult {
                    success: true,
                    error: None,
                    stats: Some(persisted.stats),
                    changes: Some(persisted.changes),
                    committed: Some(committed),
                    publish_error,
                    backup: persisted.backup,
                    trigger,
                    timestamp: Utc::now(),
                }
            }
            Err(err) => {
                tracing::error!(
                    trigger = trigger.as_str(),
                    kind = err.kind(),
                    error = %err,
                    "pipeline run failed"
                );
                RunResult::failed(trigger, &err)
            }
        }
    }

    async fn execute(&self) -> Result<Persisted, PipelineError> {
        if !self.settings.updates_enabled {
            return Err(PipelineError::Disabled);
        }

        let snapshot_path = self.persistor.snapshot_path();
        let _lock = RunLock::try_acquire(snapshot_path)
            .map_err(PipelineError::Lock)?
            .ok_or_else(|| PipelineError::Busy(snapshot_path.to_path_buf()))?;

        let document = self.fetcher.fetch(&self.settings.source_url).await?;
        let extracted = self.extractor.extract(&document).await?;
        let (regions, stats) = aggregate(extracted);
        validate(&stats, &self.settings.validation)?;

        let snapshot = Snapshot::new(Utc::now(), &self.settings.source_url, stats, regions);
        let persistor = self.persistor.clone();
        let publisher = self.publisher.clone();
        let noise_threshold = self.settings.noise_threshold;

        tokio::task::spawn_blocking(move || {
            persist_and_publish(&persistor, &publisher, snapshot, noise_threshold)
        })
        .await
        .map_err(|err| PipelineError::Task(err.to_string()))?
    }
}

fn persist_and_publish(
    persistor: &Persistor,
    publisher: &Publisher,
    snapshot: Snapshot,
    noise_threshold: u64,
) -> Result<Persisted, PipelineError> {
    let previous = match persistor.load_current() {
        Ok(previous) => previous,
        Err(err) => {
            tracing::warn!(error = %err, "previous snapshot unreadable, skipping change report");
            None
        }
    };
    let changes = diff(previous.as_ref(), &snapshot, noise_threshold);
    let stats = snapshot.stats();

    let backup = persistor.persist(&snapshot)?;

    let publish = publisher
        .publish(
            persistor.snapshot_path(),
            &stats,
            &changes,
            snapshot.retrieved_at.date_naive(),
        )
        .map_err(|err| {
            tracing::warn!(error = %err, "publishing failed, snapshot kept locally");
            err.to_string()
        });

    Ok(Persisted {
        stats,
        changes,
        backup,
        publish,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_serializes_kind_and_omits_empty_fields() {
        let result = RunResult::failed(Trigger::Manual, &PipelineError::Disabled);
        let value = serde_json::to_value(&result).expect("serialize");

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["kind"], "disabled");
        assert_eq!(value["trigger"], "manual");
        assert!(value.get("stats").is_none());
        assert!(value.get("publishError").is_none());
    }

    #[test]
    fn validation_failure_names_the_check() {
        let err = PipelineError::from(ValidationError::TooFewRegions {
            observed: 10,
            minimum: 40,
        });
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().starts_with("validation failed [min_regions]"));
    }
}
