//! Column schema and CSV layout of the persisted dataset.
//!
//! The dataset's columns are the union of every field name ever appended,
//! kept in first-seen order. The on-disk form is a plain CSV table whose
//! first column is always `Timestamp`; an empty cell is the missing-value
//! marker. Reading and writing the cells themselves is left to `csv`.

use crate::models::TIMESTAMP_COLUMN;

// ---

/// Ordered union of value columns (the timestamp column is implicit).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Add `name` at the end unless it is already present. Returns whether it was new.
    pub fn add(&mut self, name: &str) -> bool {
        // ---
        if self.contains(name) {
            return false;
        }
        self.columns.push(name.to_string());
        true
    }

    /// Build a schema from a header row (first cell must be the timestamp column).
    ///
    /// Repeated column names keep their first position; the later duplicates
    /// are reported back so the loader can ignore their cells.
    pub fn from_header(header: &[String]) -> Result<(Self, Vec<bool>), String> {
        // ---
        let first = header
            .first()
            .map(|c| c.trim_start_matches('\u{feff}').trim())
            .ok_or_else(|| "header row is empty".to_string())?;
        if first != TIMESTAMP_COLUMN {
            return Err(format!(
                "first header column is '{first}', expected '{TIMESTAMP_COLUMN}'"
            ));
        }

        let mut schema = Schema::new();
        let mut keep = Vec::with_capacity(header.len().saturating_sub(1));
        for name in &header[1..] {
            let name = name.trim();
            let fresh = !name.is_empty() && name != TIMESTAMP_COLUMN && schema.add(name);
            if !fresh {
                tracing::warn!("Ignoring duplicate or blank header column '{}'", name);
            }
            keep.push(fresh);
        }
        Ok((schema, keep))
    }

    /// Header cells including the leading timestamp column.
    pub fn header(&self) -> Vec<&str> {
        // ---
        std::iter::once(TIMESTAMP_COLUMN)
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }
}
