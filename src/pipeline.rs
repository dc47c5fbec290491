//! One scheduled run: fetch, normalize, append, persist, aggregate, report.
//!
//! Everything up to and including `persist` is mandatory and aborts the run
//! on failure, before any notification is attempted. Reporting runs only
//! after the dataset is safely on disk, and its failures downgrade the run
//! to [`RunOutcome::Degraded`] instead of failing it.

use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, error, info, warn};

use crate::aggregate::curve_for_today;
use crate::config::Config;
use crate::error::Result;
use crate::models::CURRENT_COUNT_COLUMN;
use crate::report::{Notifier, ReportBuilder};
use crate::sampler::Sampler;
use crate::store::TimeSeriesStore;
use crate::weather::WeatherProvider;

/// Exit code for a run whose data was stored but whose report was not delivered.
pub const EXIT_DEGRADED: i32 = 2;

// ---

/// How a run that stored its reading ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Reading stored; report delivered or intentionally skipped.
    Complete { rows: usize, reported: bool },
    /// Reading stored; building or delivering the report failed.
    Degraded { rows: usize, reason: String },
}

impl RunOutcome {
    /// Process exit code: 0 when complete, [`EXIT_DEGRADED`] when degraded.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Complete { .. } => 0,
            RunOutcome::Degraded { .. } => EXIT_DEGRADED,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            RunOutcome::Complete { rows, .. } | RunOutcome::Degraded { rows, .. } => *rows,
        }
    }
}

/// Collaborators for one run, wired once at startup.
pub struct Pipeline<S, W, B, N> {
    // ---
    pub store: TimeSeriesStore,
    pub sampler: S,
    pub weather: Option<W>,
    pub builder: B,
    pub notifier: N,
    pub notify_on_hour_only: bool,
}

impl<S, W, B, N> Pipeline<S, W, B, N>
where
    S: Sampler,
    W: WeatherProvider,
    B: ReportBuilder,
    N: Notifier,
{
    /// Wire the collaborators with the store settings from `config`.
    pub fn new(config: &Config, sampler: S, weather: Option<W>, builder: B, notifier: N) -> Self {
        // ---
        Pipeline {
            store: TimeSeriesStore::new(&config.data_path, config.duplicate_policy),
            sampler,
            weather,
            builder,
            notifier,
            notify_on_hour_only: config.notify_on_hour_only,
        }
    }

    /// Execute one run at local civil time `now`.
    ///
    /// Returns `Err` only for the mandatory stages (sampling, normalization,
    /// load, persist) and for a weather provider failing with a fatal error
    /// such as bad configuration; nothing is written when those fail before
    /// persist. A transient weather failure only drops the weather fields.
    pub async fn run(&self, now: NaiveDateTime) -> Result<RunOutcome> {
        // ---
        info!("Run started at {}", now);

        // Step 1: Sample occupancy
        debug!("Run - Step 1: sample");
        let mut raw = self.sampler.fetch_reading(now).await.map_err(|e| {
            error!("Sampling failed, nothing written: {}", e);
            e
        })?;

        // Step 2: Weather (optional)
        debug!("Run - Step 2: weather");
        if let Some(weather) = &self.weather {
            match weather.fetch_weather().await {
                Ok(fields) => raw.merge_auxiliary(fields),
                Err(e) if e.is_fatal() => {
                    error!("Weather provider unusable, nothing written: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("{}; continuing without weather fields", e),
            }
        }

        // Step 3: Normalize
        debug!("Run - Step 3: normalize");
        let reading = raw.normalize()?;

        // Step 4: Append and persist against a fresh load
        debug!("Run - Step 4: append + persist");
        let dataset = self.store.load()?;
        let dataset = self.store.append(&reading, dataset);
        self.store.persist(&dataset)?;
        let rows = dataset.len();

        if self.notify_on_hour_only && now.minute() != 0 {
            info!("Stored reading ({} rows); not on the hour, skipping report", rows);
            return Ok(RunOutcome::Complete {
                rows,
                reported: false,
            });
        }

        // Step 5: Aggregate
        debug!("Run - Step 5: aggregate");
        let curve = curve_for_today(&dataset, &reading.timestamp, CURRENT_COUNT_COLUMN);

        // Step 6: Report
        debug!("Run - Step 6: report");
        let report = match self.builder.build(&curve, &reading).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Report not built, data is stored: {}", e);
                return Ok(RunOutcome::Degraded {
                    rows,
                    reason: e.to_string(),
                });
            }
        };

        match self
            .notifier
            .send(&report.text, report.image_url.as_deref())
            .await
        {
            Ok(status) => {
                info!("Run complete: {} rows, report {:?}", rows, status);
                Ok(RunOutcome::Complete {
                    rows,
                    reported: true,
                })
            }
            Err(e) => {
                warn!("Notification failed, data is stored: {}", e);
                Ok(RunOutcome::Degraded {
                    rows,
                    reason: e.to_string(),
                })
            }
        }
    }
}
