//! Data models for the crowd-meter pipeline.
//!
//! A [`RawReading`] is whatever the sampler and weather provider handed us,
//! with every value still untrusted JSON. [`RawReading::normalize`] turns it
//! into a [`Reading`]: a fixed set of named occupancy fields plus an open
//! map of auxiliary numeric fields (pool counts, weather), which is what the
//! dataset's column union is built from.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::bucket::{format_timestamp, parse_timestamp};
use crate::error::{PipelineError, Result};

/// Row key column; always first in the persisted dataset.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";
/// People currently inside the primary facility.
pub const CURRENT_COUNT_COLUMN: &str = "current_count";
/// Permitted head count of the primary facility.
pub const CAPACITY_COLUMN: &str = "capacity_full";
/// `current_count / capacity_full`, four decimals.
pub const RATIO_COLUMN: &str = "capacity_ratio";

/// Columns owned by the reading itself; auxiliary fields may not reuse them.
const RESERVED_COLUMNS: [&str; 4] = [
    TIMESTAMP_COLUMN,
    CURRENT_COUNT_COLUMN,
    CAPACITY_COLUMN,
    RATIO_COLUMN,
];

/// Whether `name` can be stored as an auxiliary column.
fn is_auxiliary_name(name: &str) -> bool {
    !name.is_empty() && name.trim() == name && !RESERVED_COLUMNS.contains(&name)
}

// ---

/// Sampler output before validation.
#[derive(Debug, Clone, Default)]
pub struct RawReading {
    // ---
    pub timestamp: String,
    pub occupancy_current: Option<Value>,
    pub occupancy_capacity: Option<Value>,
    pub auxiliary: BTreeMap<String, Value>,
}

/// Occupancy ratio of a reading.
///
/// `Undefined` covers a zero capacity as well as a missing count or capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum OccupancyRatio {
    Defined(f64),
    Undefined,
}

impl OccupancyRatio {
    pub fn value(self) -> Option<f64> {
        match self {
            OccupancyRatio::Defined(v) => Some(v),
            OccupancyRatio::Undefined => None,
        }
    }
}

/// One normalized observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    // ---
    pub timestamp: NaiveDateTime,
    pub occupancy_current: Option<u32>,
    pub occupancy_capacity: Option<u32>,
    /// Secondary facility counts and weather. Absent key means missing.
    pub auxiliary: BTreeMap<String, f64>,
}

impl RawReading {
    // ---
    pub fn new(timestamp: impl Into<String>) -> Self {
        RawReading {
            timestamp: timestamp.into(),
            ..Default::default()
        }
    }

    /// Merge auxiliary values (e.g. weather) into this reading. Later values win.
    pub fn merge_auxiliary<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.auxiliary.extend(fields);
    }

    /// Validate every field and build a [`Reading`].
    ///
    /// A value that does not parse drops just that field. Auxiliary names are
    /// trimmed; a blank name or one that collides with a core column is
    /// dropped. An unparsable timestamp rejects the whole reading with
    /// [`PipelineError::InvalidReading`].
    pub fn normalize(&self) -> Result<Reading> {
        // ---
        let timestamp = parse_timestamp(&self.timestamp).map_err(|_| {
            PipelineError::InvalidReading(format!("unparsable timestamp '{}'", self.timestamp))
        })?;

        let occupancy_current = parse_count(CURRENT_COUNT_COLUMN, self.occupancy_current.as_ref());
        let occupancy_capacity = parse_count(CAPACITY_COLUMN, self.occupancy_capacity.as_ref());

        let mut auxiliary = BTreeMap::new();
        for (name, value) in &self.auxiliary {
            let name = name.trim();
            if !is_auxiliary_name(name) {
                tracing::warn!("Dropping auxiliary field '{}': blank or reserved name", name);
                continue;
            }
            match parse_number(value) {
                Some(v) => {
                    auxiliary.insert(name.to_string(), v);
                }
                None => {
                    tracing::warn!("Field '{}' has non-numeric value {}, marking missing", name, value);
                }
            }
        }

        Ok(Reading {
            timestamp,
            occupancy_current,
            occupancy_capacity,
            auxiliary,
        })
    }
}

impl Reading {
    // ---
    /// Derived ratio, rounded to four decimal places. Never divides by zero.
    pub fn occupancy_ratio(&self) -> OccupancyRatio {
        // ---
        match (self.occupancy_current, self.occupancy_capacity) {
            (Some(current), Some(capacity)) if capacity > 0 => {
                let ratio = f64::from(current) / f64::from(capacity);
                OccupancyRatio::Defined((ratio * 10_000.0).round() / 10_000.0)
            }
            _ => OccupancyRatio::Undefined,
        }
    }

    /// Timestamp in the persisted layout.
    pub fn timestamp_key(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// Column/value pairs for persistence, core columns first.
    ///
    /// Core columns are always emitted, with `None` where the value is missing
    /// or undefined, so the dataset header keeps them even on a bad sample.
    /// Auxiliary entries that would shadow a core column are skipped.
    pub fn fields(&self) -> Vec<(String, Option<f64>)> {
        // ---
        let mut fields = vec![
            (
                CURRENT_COUNT_COLUMN.to_string(),
                self.occupancy_current.map(f64::from),
            ),
            (
                CAPACITY_COLUMN.to_string(),
                self.occupancy_capacity.map(f64::from),
            ),
            (RATIO_COLUMN.to_string(), self.occupancy_ratio().value()),
        ];
        fields.extend(
            self.auxiliary
                .iter()
                .filter(|(name, _)| is_auxiliary_name(name))
                .map(|(name, value)| (name.clone(), Some(*value))),
        );
        fields
    }
}

/// Parse a head count; negative, fractional or non-numeric values are missing.
fn parse_count(name: &str, value: Option<&Value>) -> Option<u32> {
    // ---
    let value = value?;
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!("Field '{}' has invalid count {}, marking missing", name, value);
    }
    parsed
}

/// Parse a finite number from a JSON number or numeric string.
pub(crate) fn parse_number(value: &Value) -> Option<f64> {
    // ---
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{NaiveDate, Timelike};
    use serde_json::json;

    fn create_test_raw_reading(current: Value, capacity: Value) -> RawReading {
        // ---
        let mut raw = RawReading::new("2024-03-04 08:00");
        raw.occupancy_current = Some(current);
        raw.occupancy_capacity = Some(capacity);
        raw
    }

    #[test]
    fn test_ratio_rounding() {
        // ---
        let raw = create_test_raw_reading(json!(5), json!(50));
        let reading = raw.normalize().unwrap();
        assert_eq!(reading.occupancy_ratio(), OccupancyRatio::Defined(0.1));

        let raw = create_test_raw_reading(json!(1), json!(3));
        let reading = raw.normalize().unwrap();
        assert_eq!(reading.occupancy_ratio(), OccupancyRatio::Defined(0.3333));
    }

    #[test]
    fn test_zero_capacity_is_undefined() {
        // ---
        let raw = create_test_raw_reading(json!(12), json!(0));
        let reading = raw.normalize().unwrap();
        assert_eq!(reading.occupancy_capacity, Some(0));
        assert_eq!(reading.occupancy_ratio(), OccupancyRatio::Undefined);
        assert_eq!(reading.occupancy_ratio().value(), None);
    }

    #[test]
    fn test_over_capacity_is_kept() {
        // ---
        let raw = create_test_raw_reading(json!(60), json!(50));
        let reading = raw.normalize().unwrap();
        assert_eq!(reading.occupancy_ratio(), OccupancyRatio::Defined(1.2));
    }

    #[test]
    fn test_bad_field_marks_only_that_field_missing() {
        // ---
        let mut raw = create_test_raw_reading(json!("n/a"), json!("50"));
        raw.merge_auxiliary([
            ("temp".to_string(), json!(27.5)),
            ("humidity".to_string(), json!("eighty")),
        ]);
        let reading = raw.normalize().unwrap();

        assert_eq!(reading.occupancy_current, None);
        assert_eq!(reading.occupancy_capacity, Some(50));
        assert_eq!(reading.occupancy_ratio(), OccupancyRatio::Undefined);
        assert_eq!(reading.auxiliary.get("temp"), Some(&27.5));
        assert!(!reading.auxiliary.contains_key("humidity"));
    }

    #[test]
    fn test_negative_count_is_missing() {
        // ---
        let raw = create_test_raw_reading(json!(-3), json!(50));
        assert_eq!(raw.normalize().unwrap().occupancy_current, None);
    }

    #[test]
    fn test_bad_timestamp_rejects_reading() {
        // ---
        let mut raw = create_test_raw_reading(json!(5), json!(50));
        raw.timestamp = "not a time".to_string();
        assert!(matches!(
            raw.normalize(),
            Err(PipelineError::InvalidReading(_))
        ));
    }

    #[test]
    fn test_fields_keep_core_columns() {
        // ---
        let mut raw = create_test_raw_reading(json!(5), json!(0));
        raw.merge_auxiliary([("current_count_swim".to_string(), json!(7))]);
        let reading = raw.normalize().unwrap();
        let fields = reading.fields();

        assert_eq!(fields[0], ("current_count".to_string(), Some(5.0)));
        assert_eq!(fields[1], ("capacity_full".to_string(), Some(0.0)));
        assert_eq!(fields[2], ("capacity_ratio".to_string(), None));
        assert_eq!(fields[3], ("current_count_swim".to_string(), Some(7.0)));
        assert_eq!(reading.timestamp_key(), "2024-03-04 08:00");
        assert_eq!(
            reading.timestamp,
            NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap()
        );
        assert_eq!(reading.timestamp.minute(), 0);
    }

    #[test]
    fn test_auxiliary_names_are_trimmed_and_screened() {
        // ---
        let mut raw = create_test_raw_reading(json!(5), json!(50));
        raw.merge_auxiliary([
            ("Timestamp".to_string(), json!(1)),
            (" temp".to_string(), json!(2)),
            ("  ".to_string(), json!(3)),
        ]);
        let reading = raw.normalize().unwrap();
        assert_eq!(
            reading.auxiliary,
            BTreeMap::from([("temp".to_string(), 2.0)])
        );
    }

    #[test]
    fn test_auxiliary_cannot_shadow_core_columns() {
        // ---
        let mut raw = create_test_raw_reading(json!(5), json!(50));
        raw.merge_auxiliary([
            ("current_count".to_string(), json!(999)),
            ("capacity_ratio".to_string(), json!(0.9)),
        ]);
        let mut reading = raw.normalize().unwrap();
        assert!(reading.auxiliary.is_empty());

        reading.auxiliary.insert("capacity_full".to_string(), 1.0);
        let fields = reading.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], ("current_count".to_string(), Some(5.0)));
        assert_eq!(fields[1], ("capacity_full".to_string(), Some(50.0)));
        assert_eq!(fields[2], ("capacity_ratio".to_string(), Some(0.1)));
    }
}
