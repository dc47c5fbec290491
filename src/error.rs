//! Error taxonomy for one crowd-meter run.
//!
//! Each variant maps to a stage of the pipeline and carries enough context
//! to decide whether the run must abort (`Sampler`, `InvalidReading`,
//! `CorruptDataset`, `Io`, `Config`) or may continue in a degraded state
//! (`Weather`, `MalformedTimestamp`, `Report`, `Delivery`).
//!
//! There is intentionally no "missing dataset" variant: an absent dataset
//! file is the first-run bootstrap and loads as an empty `Dataset`.

use std::path::PathBuf;

/// Errors produced by the ingestion and aggregation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // ---
    /// The occupancy counter could not be fetched or parsed. Fatal; nothing is written.
    #[error("Sampler failed: {0}")]
    Sampler(String),

    /// Weather could not be fetched. The reading proceeds without weather fields.
    #[error("Weather provider failed: {0}")]
    Weather(String),

    /// The raw reading cannot be normalized (unparsable timestamp).
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// The dataset exists but cannot be parsed. Requires manual intervention.
    #[error("Dataset at {} is corrupt: {detail}", .path.display())]
    CorruptDataset { path: PathBuf, detail: String },

    /// A historical row carries a timestamp that does not parse.
    #[error("Malformed timestamp '{0}'")]
    MalformedTimestamp(String),

    /// The report could not be built.
    #[error("Report builder failed: {0}")]
    Report(String),

    /// The notification could not be delivered.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    /// Filesystem failure while reading or writing the dataset.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the run before the notification stage.
    pub fn is_fatal(&self) -> bool {
        // ---
        matches!(
            self,
            PipelineError::Sampler(_)
                | PipelineError::InvalidReading(_)
                | PipelineError::CorruptDataset { .. }
                | PipelineError::Io { .. }
                | PipelineError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
