//! Same-weekday occupancy profile.
//!
//! Builds the "typical day" curve for one weekday: every historical row for
//! that weekday is dropped into its fifteen-minute bucket and each bucket is
//! averaged. Rows whose timestamp does not parse are skipped, not fatal.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Weekday};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bucket::{bucket_label, bucket_of, parse_timestamp, weekday_label, weekday_of, BucketIndex};
use crate::store::Dataset;

// ---

/// Mean of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub bucket: BucketIndex,
    pub mean: f64,
    /// Distinct timestamps that contributed.
    pub samples: usize,
}

impl CurvePoint {
    pub fn label(&self) -> String {
        bucket_label(self.bucket).unwrap_or_default()
    }
}

/// Per-bucket means for one weekday, ascending by bucket. Empty buckets are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Curve {
    pub points: Vec<CurvePoint>,
}

impl Curve {
    // ---
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn get(&self, bucket: BucketIndex) -> Option<&CurvePoint> {
        self.points
            .binary_search_by_key(&bucket, |p| p.bucket)
            .ok()
            .map(|i| &self.points[i])
    }

    /// Bucket with the highest mean, if any.
    pub fn peak(&self) -> Option<&CurvePoint> {
        self.points
            .iter()
            .max_by(|a, b| a.mean.total_cmp(&b.mean))
    }
}

/// Compute the curve of `value_field` for `target` weekday.
///
/// Rows sharing a timestamp are first collapsed into one sample (the mean of
/// their present values), so a duplicated sample never counts twice. Rows
/// without `value_field` do not contribute; they are not read as zero.
/// The result does not depend on row order.
pub fn curve_for(dataset: &Dataset, target: Weekday, value_field: &str) -> Curve {
    // ---
    let mut skipped = 0usize;
    let mut by_timestamp: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();

    for record in dataset.records() {
        let ts = match parse_timestamp(&record.timestamp) {
            Ok(ts) => ts,
            Err(e) => {
                debug!("Skipping row: {}", e);
                skipped += 1;
                continue;
            }
        };
        if weekday_of(&ts) != target {
            continue;
        }
        if let Some(v) = record.value(value_field) {
            let entry = by_timestamp.entry(ts).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }

    if skipped > 0 {
        warn!("Skipped {} row(s) with malformed timestamps", skipped);
    }

    let mut by_bucket: BTreeMap<BucketIndex, (f64, usize)> = BTreeMap::new();
    let mut collapsed = 0usize;
    for (ts, (sum, count)) in by_timestamp {
        if count > 1 {
            collapsed += count - 1;
        }
        let entry = by_bucket.entry(bucket_of(&ts)).or_insert((0.0, 0));
        entry.0 += sum / count as f64;
        entry.1 += 1;
    }
    if collapsed > 0 {
        debug!("Collapsed {} duplicate-timestamp row(s)", collapsed);
    }

    let points: Vec<CurvePoint> = by_bucket
        .into_iter()
        .map(|(bucket, (sum, samples))| CurvePoint {
            bucket,
            mean: sum / samples as f64,
            samples,
        })
        .collect();

    debug!(
        "Curve for {} on '{}': {} bucket(s)",
        weekday_label(target),
        value_field,
        points.len()
    );
    Curve { points }
}

/// Curve for the weekday of `now`.
pub fn curve_for_today(dataset: &Dataset, now: &NaiveDateTime, value_field: &str) -> Curve {
    curve_for(dataset, weekday_of(now), value_field)
}
