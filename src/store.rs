//! Append-only, schema-tolerant time series store.
//!
//! The whole dataset lives in one CSV file. Every run loads it fresh,
//! appends the new reading in memory and writes the full table back through
//! a temp file that is renamed over the original, so a reader (or a crash)
//! only ever sees the old file or the new one.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bucket::parse_timestamp;
use crate::error::{PipelineError, Result};
use crate::models::Reading;
use crate::schema::Schema;

// ---

/// What `append` does when a row with the same timestamp already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep every sample, including repeated timestamps.
    #[default]
    KeepAll,
    /// Replace earlier rows that share the new row's timestamp.
    LastWriteWins,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep_all" => Ok(DuplicatePolicy::KeepAll),
            "last_write_wins" | "lww" => Ok(DuplicatePolicy::LastWriteWins),
            other => Err(format!(
                "unknown duplicate policy '{other}' (expected keep or last_write_wins)"
            )),
        }
    }
}

/// One persisted row. The timestamp is kept as written so malformed
/// historical rows survive a load/persist cycle untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    // ---
    pub timestamp: String,
    /// Present cells only; a column absent here is missing for this row.
    pub values: BTreeMap<String, f64>,
}

impl Record {
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }

    /// Parsed timestamp, `None` for a malformed historical row.
    fn instant(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp).ok()
    }
}

/// All persisted rows plus the union of their columns, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    // ---
    schema: Schema,
    records: Vec<Record>,
}

impl Dataset {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// File-backed store for one dataset.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    path: PathBuf,
    policy: DuplicatePolicy,
}

impl TimeSeriesStore {
    // ---
    pub fn new(path: impl Into<PathBuf>, policy: DuplicatePolicy) -> Self {
        TimeSeriesStore {
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the dataset from disk.
    ///
    /// A missing file is the first run and yields an empty dataset. A file
    /// the CSV reader rejects (bad UTF-8, I/O failure mid-read), an empty
    /// file, a header that does not start with `Timestamp` or a row wider
    /// than the header is [`PipelineError::CorruptDataset`]. Short rows are
    /// padded with missing cells and non-numeric cells load as missing.
    pub fn load(&self) -> Result<Dataset> {
        // ---
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No dataset at {}, starting empty", self.path.display());
                return Ok(Dataset::new());
            }
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let mut rows = reader.records();

        let header: Vec<String> = match rows.next() {
            Some(row) => row
                .map_err(|e| self.corrupt(e.to_string()))?
                .iter()
                .map(str::to_string)
                .collect(),
            None => return Err(self.corrupt("file has no header")),
        };
        let (schema, keep) = Schema::from_header(&header).map_err(|e| self.corrupt(e))?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(|e| self.corrupt(e.to_string()))?;
            let line = row.position().map_or(0, |p| p.line());
            if row.len() > header.len() {
                return Err(self.corrupt(format!(
                    "line {line} has {} cells, header has {}",
                    row.len(),
                    header.len()
                )));
            }

            let timestamp = row.get(0).unwrap_or_default().to_string();
            let mut values = BTreeMap::new();
            for ((cell, name), wanted) in row.iter().skip(1).zip(&header[1..]).zip(&keep) {
                if !*wanted || cell.is_empty() {
                    continue;
                }
                match cell.parse::<f64>() {
                    Ok(v) if v.is_finite() => {
                        values.insert(name.clone(), v);
                    }
                    _ => warn!(
                        "Line {} column '{}' has non-numeric value '{}', treating as missing",
                        line, name, cell
                    ),
                }
            }
            records.push(Record { timestamp, values });
        }

        debug!(
            "Loaded {} rows x {} columns from {}",
            records.len(),
            schema.len(),
            self.path.display()
        );
        Ok(Dataset { schema, records })
    }

    /// Return `dataset` with `reading` added.
    ///
    /// New field names extend the column union; older rows simply have no
    /// value for them. Timestamps compare as instants, so a legacy
    /// `08:00:00` row and a new `08:00` row are the same sample time. The
    /// row is placed so the dataset stays newest first, ahead of any
    /// existing rows with the same timestamp.
    pub fn append(&self, reading: &Reading, dataset: Dataset) -> Dataset {
        // ---
        let Dataset {
            mut schema,
            mut records,
        } = dataset;

        let instant = Some(reading.timestamp);
        let mut values = BTreeMap::new();
        for (name, value) in reading.fields() {
            if schema.add(&name) {
                info!("Dataset gains new column '{}'", name);
            }
            if let Some(v) = value {
                values.insert(name, v);
            }
        }

        let timestamp = reading.timestamp_key();
        if self.policy == DuplicatePolicy::LastWriteWins {
            let before = records.len();
            records.retain(|r| r.instant() != instant);
            if records.len() != before {
                debug!(
                    "Replaced {} existing row(s) at {}",
                    before - records.len(),
                    timestamp
                );
            }
        } else if records.iter().any(|r| r.instant() == instant) {
            debug!("Keeping duplicate sample at {}", timestamp);
        }

        let pos = records.partition_point(|r| r.instant() > instant);
        records.insert(pos, Record { timestamp, values });

        Dataset { schema, records }
    }

    /// Write the whole dataset, newest row first, replacing the file atomically.
    ///
    /// Rows are ordered by parsed timestamp; rows with a malformed timestamp
    /// go last, and equal timestamps keep their in-memory order.
    pub fn persist(&self, dataset: &Dataset) -> Result<()> {
        // ---
        let mut ordered: Vec<(Reverse<Option<NaiveDateTime>>, &Record)> = dataset
            .records
            .iter()
            .map(|r| (Reverse(r.instant()), r))
            .collect();
        ordered.sort_by_key(|(key, _)| *key);

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset.csv".to_string());
        let tmp_path = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let mut tmp_guard = TempFileGuard::new(tmp_path.clone());
        let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| PipelineError::io(&tmp_path, e))?;
        {
            let mut writer = csv::Writer::from_writer(&mut tmp_file);
            let io_err = |e: csv::Error| PipelineError::io(&tmp_path, std::io::Error::from(e));
            writer.write_record(dataset.schema.header()).map_err(io_err)?;
            for (_, record) in &ordered {
                let cells = dataset
                    .schema
                    .columns()
                    .iter()
                    .map(|c| record.value(c).map(|v| v.to_string()).unwrap_or_default());
                writer
                    .write_record(std::iter::once(record.timestamp.clone()).chain(cells))
                    .map_err(io_err)?;
            }
            writer.flush().map_err(|e| PipelineError::io(&tmp_path, e))?;
        }
        tmp_file.sync_all().map_err(|e| PipelineError::io(&tmp_path, e))?;
        drop(tmp_file);
        fs::rename(&tmp_path, &self.path).map_err(|e| PipelineError::io(&self.path, e))?;
        tmp_guard.disarm();

        if let Err(e) = sync_dir(&dir) {
            warn!("Directory fsync failed after replacing {}: {}", self.path.display(), e);
        }

        info!(
            "Persisted {} rows x {} columns to {}",
            dataset.len(),
            dataset.schema.len(),
            self.path.display()
        );
        Ok(())
    }

    fn corrupt(&self, detail: impl Into<String>) -> PipelineError {
        PipelineError::CorruptDataset {
            path: self.path.clone(),
            detail: detail.into(),
        }
    }
}

/// Flush the directory entry so the rename itself survives a power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Removes a half-written temp file unless the write made it to the rename.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to clean up temp file {}: {}", self.path.display(), e);
            }
        }
    }
}
