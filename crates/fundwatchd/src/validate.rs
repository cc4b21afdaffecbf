use fundwatch_config::ValidationConfig;
use fundwatch_core::SnapshotStats;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("too few regions: found {observed}, expected at least {minimum}")]
    TooFewRegions { observed: usize, minimum: usize },
    #[error("too few records: found {observed}, expected at least {minimum}")]
    TooFewRecords { observed: usize, minimum: usize },
    #[error("total amount too low: found ${observed}, expected at least ${minimum}")]
    TotalTooLow { observed: u64, minimum: u64 },
}

impl ValidationError {
    /// Name of the failed check, stable for logs and run results.
    pub fn check(&self) -> &'static str {
        match self {
            Self::TooFewRegions { .. } => "min_regions",
            Self::TooFewRecords { .. } => "min_records",
            Self::TotalTooLow { .. } => "min_total_amount",
        }
    }
}

/// Plausibility gate between extraction and persistence.
pub fn validate(stats: &SnapshotStats, thresholds: &ValidationConfig) -> Result<(), ValidationError> {
    tracing::info!(
        regions = stats.region_count,
        records = stats.record_count,
        total_amount = stats.total_amount,
        "validating extraction"
    );

    if stats.region_count < thresholds.min_regions {
        return Err(ValidationError::TooFewRegions {
            observed: stats.region_count,
            minimum: thresholds.min_regions,
        });
    }
    if stats.record_count < thresholds.min_records {
        return Err(ValidationError::TooFewRecords {
            observed: stats.record_count,
            minimum: thresholds.min_records,
        });
    }
    if stats.total_amount < thresholds.min_total_amount {
        return Err(ValidationError::TotalTooLow {
            observed: stats.total_amount,
            minimum: thresholds.min_total_amount,
        });
    }

    Ok(())
}
