//! Gym crowd meter: samples an occupancy counter and the weather, appends
//! each sample to a CSV time series and derives a same-weekday profile.
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): modules
//! talk to each other through the items re-exported here, and `main.rs`
//! only wires configuration, collaborators and the exit code.

pub mod aggregate;
pub mod bucket;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod sampler;
pub mod schema;
pub mod store;
pub mod weather;

pub use aggregate::{curve_for, curve_for_today, Curve, CurvePoint};
pub use bucket::{bucket_label, bucket_of, local_now, parse_weekday_label, weekday_label, weekday_of};
pub use config::Config;
pub use error::{PipelineError, Result};
pub use models::{OccupancyRatio, RawReading, Reading};
pub use pipeline::{Pipeline, RunOutcome};
pub use report::{
    ConfiguredNotifier, DeliveryStatus, LogNotifier, Notifier, Report, ReportBuilder,
    SummaryReportBuilder, WebhookNotifier,
};
pub use sampler::{CounterFeedSampler, Sampler};
pub use store::{Dataset, DuplicatePolicy, Record, TimeSeriesStore};
pub use weather::{OpenWeatherProvider, WeatherProvider};
