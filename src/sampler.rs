//! Occupancy sampler.
//!
//! A [`Sampler`] turns "now" into a [`RawReading`]. The production
//! implementation reads the sports center's structured counter feed; tests
//! and alternative sources (e.g. an HTML scrape) plug in behind the same trait.

use std::future::Future;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::bucket::format_timestamp;
use crate::error::{PipelineError, Result};
use crate::models::RawReading;

/// Pool head count, second segment of the counter feed.
pub const SWIM_COUNT_COLUMN: &str = "current_count_swim";
/// Pool capacity, second segment of the counter feed.
pub const SWIM_CAPACITY_COLUMN: &str = "capacity_full_swim";

// ---

/// Source of raw occupancy readings.
pub trait Sampler {
    /// Fetch the current counter and stamp it with `now` (local civil time).
    fn fetch_reading(&self, now: NaiveDateTime) -> impl Future<Output = Result<RawReading>> + Send;
}

/// Counter feed response: `{"CounterData":[{"innerCount":"12;3","permitNum":"150;60"}]}`.
#[derive(Debug, Deserialize)]
struct CounterFeed {
    #[serde(rename = "CounterData")]
    counter_data: Vec<CounterEntry>,
}

#[derive(Debug, Deserialize)]
struct CounterEntry {
    #[serde(rename = "innerCount")]
    inner_count: String,
    #[serde(rename = "permitNum")]
    permit_num: String,
}

/// Reads the `counter.txt` JSON feed over HTTP.
#[derive(Debug, Clone)]
pub struct CounterFeedSampler {
    client: reqwest::Client,
    url: String,
}

impl CounterFeedSampler {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        CounterFeedSampler {
            client,
            url: url.into(),
        }
    }
}

impl Sampler for CounterFeedSampler {
    async fn fetch_reading(&self, now: NaiveDateTime) -> Result<RawReading> {
        // ---
        debug!("Fetching counter feed from: {}", self.url);

        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Sampler(format!("request to {} failed: {}", self.url, e)))?
            .text()
            .await
            .map_err(|e| PipelineError::Sampler(format!("reading body failed: {e}")))?;

        debug!("Counter feed raw response: {}", body);

        let raw = parse_counter_feed(&body, now)?;
        info!(
            "Sampled counter at {}: current={:?} capacity={:?}",
            raw.timestamp, raw.occupancy_current, raw.occupancy_capacity
        );
        Ok(raw)
    }
}

/// Parse a counter feed body into a raw reading stamped `now`.
///
/// The first `;` segment of each counter is the gym, the second the pool.
/// Segments are passed through untouched; normalization decides whether
/// they are numbers.
pub fn parse_counter_feed(body: &str, now: NaiveDateTime) -> Result<RawReading> {
    // ---
    let feed: CounterFeed = serde_json::from_str(body.trim())
        .map_err(|e| PipelineError::Sampler(format!("counter feed is not valid JSON: {e}")))?;
    let entry = feed
        .counter_data
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Sampler("counter feed has no CounterData".to_string()))?;

    let counts: Vec<&str> = entry.inner_count.split(';').map(str::trim).collect();
    let permits: Vec<&str> = entry.permit_num.split(';').map(str::trim).collect();

    let segment = |parts: &[&str], i: usize| -> Option<Value> {
        parts
            .get(i)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
    };

    let mut raw = RawReading::new(format_timestamp(&now));
    raw.occupancy_current = segment(&counts, 0);
    raw.occupancy_capacity = segment(&permits, 0);
    raw.merge_auxiliary(
        [
            (SWIM_COUNT_COLUMN, segment(&counts, 1)),
            (SWIM_CAPACITY_COLUMN, segment(&permits, 1)),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v))),
    );
    Ok(raw)
}
