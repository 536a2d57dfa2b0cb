//! Sweep container storage.
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/<measurement_id>/raw/sweep_<index:06>_<captured_at µs>.json
//! <root>/<measurement_id>/analysis.csv
//! ```
//!
//! Each sweep container is a JSON object with two sections: `log` (one row of
//! scalar and context fields) and `data` (the raw samples). Containers are
//! written once through a temp file + rename and never modified afterwards.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{AggregateTable, SweepContext, SweepRecord, validate_measurement_id};
use crate::error::DecayError;
use crate::io::aggregate::aggregate_csv_bytes;

pub const RAW_DIR: &str = "raw";
pub const AGGREGATE_FILE: &str = "analysis.csv";
const SWEEP_EXT: &str = "json";

/// Persistence collaborator: one record in, one durable write out.
pub trait SweepStore: Send + Sync {
    /// Persist a record and return the path of its container.
    fn persist(&self, record: &SweepRecord) -> Result<PathBuf, DecayError>;

    /// List the sweep containers of a measurement, sorted by file name.
    fn list(&self, measurement_id: &str) -> Result<Vec<PathBuf>, DecayError>;

    /// Load one sweep container.
    fn load(&self, path: &Path) -> Result<SweepRecord, DecayError>;

    /// Write the canonical aggregate artifact of a measurement.
    fn write_aggregate(&self, table: &AggregateTable) -> Result<PathBuf, DecayError>;
}

/// `log` section of a sweep container.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SweepLog {
    measurement_id: String,
    sweep_index: u64,
    captured_at: DateTime<Utc>,
    sample_rate: f64,
    sample_count: usize,
    #[serde(flatten)]
    context: SweepContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SweepFile {
    log: SweepLog,
    data: Vec<f64>,
}

/// File-system store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct JsonSweepStore {
    root: PathBuf,
}

impl JsonSweepStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn measurement_dir(&self, measurement_id: &str) -> PathBuf {
        self.root.join(measurement_id)
    }

    pub fn raw_dir(&self, measurement_id: &str) -> PathBuf {
        self.measurement_dir(measurement_id).join(RAW_DIR)
    }

    pub fn aggregate_path(&self, measurement_id: &str) -> PathBuf {
        self.measurement_dir(measurement_id).join(AGGREGATE_FILE)
    }

    /// Find the container of a sweep by its index.
    pub fn locate(&self, measurement_id: &str, sweep_index: u64) -> Result<Option<PathBuf>, DecayError> {
        let prefix = format!("sweep_{sweep_index:06}_");
        Ok(self.list(measurement_id)?.into_iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        }))
    }
}

/// Container file name: addressable by sweep index and by capture time.
pub fn sweep_file_name(sweep_index: u64, captured_at: DateTime<Utc>) -> String {
    format!(
        "sweep_{sweep_index:06}_{}.{SWEEP_EXT}",
        captured_at.timestamp_micros()
    )
}

impl SweepStore for JsonSweepStore {
    fn persist(&self, record: &SweepRecord) -> Result<PathBuf, DecayError> {
        validate_measurement_id(&record.measurement_id)?;
        let dir = self.raw_dir(&record.measurement_id);
        fs::create_dir_all(&dir).map_err(|e| DecayError::storage(&dir, e))?;

        let path = dir.join(sweep_file_name(record.sweep_index, record.captured_at));
        // JSON has no NaN/inf; they would be written as null and fail to load.
        ensure_finite(record).map_err(|reason| DecayError::corrupt(&path, reason))?;
        let file = SweepFile {
            log: SweepLog {
                measurement_id: record.measurement_id.clone(),
                sweep_index: record.sweep_index,
                captured_at: record.captured_at,
                sample_rate: record.sample_rate,
                sample_count: record.sample_count(),
                context: record.context.clone(),
            },
            data: record.samples.clone(),
        };
        let bytes = serde_json::to_vec(&file)
            .map_err(|e| DecayError::corrupt(&path, format!("failed to encode sweep: {e}")))?;
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), sweep = record.sweep_index, "sweep persisted");
        Ok(path)
    }

    fn list(&self, measurement_id: &str) -> Result<Vec<PathBuf>, DecayError> {
        validate_measurement_id(measurement_id)?;
        let dir = self.raw_dir(measurement_id);
        let entries = fs::read_dir(&dir).map_err(|e| DecayError::storage(&dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DecayError::storage(&dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(SWEEP_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn load(&self, path: &Path) -> Result<SweepRecord, DecayError> {
        let file = File::open(path).map_err(|e| DecayError::corrupt(path, format!("open failed: {e}")))?;
        let parsed: SweepFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DecayError::corrupt(path, format!("invalid sweep container: {e}")))?;

        let SweepFile { log, data } = parsed;
        if data.len() != log.sample_count {
            return Err(DecayError::corrupt(
                path,
                format!(
                    "sample_count={} but data holds {} samples",
                    log.sample_count,
                    data.len()
                ),
            ));
        }
        SweepRecord::new(
            log.measurement_id,
            log.sweep_index,
            log.captured_at,
            log.sample_rate,
            data,
            log.context,
        )
        .map_err(|e| DecayError::corrupt(path, e.to_string()))
    }

    fn write_aggregate(&self, table: &AggregateTable) -> Result<PathBuf, DecayError> {
        validate_measurement_id(&table.measurement_id)?;
        let dir = self.measurement_dir(&table.measurement_id);
        fs::create_dir_all(&dir).map_err(|e| DecayError::storage(&dir, e))?;
        let path = self.aggregate_path(&table.measurement_id);
        let bytes = aggregate_csv_bytes(table).map_err(|e| DecayError::storage(&path, e))?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }
}

fn ensure_finite(record: &SweepRecord) -> Result<(), String> {
    if let Some(i) = record.samples.iter().position(|v| !v.is_finite()) {
        return Err(format!(
            "sample {i} is {}; containers only hold finite samples",
            record.samples[i]
        ));
    }
    let ctx = &record.context;
    for (name, value) in [
        ("drive_current", ctx.drive_current),
        ("optical_power", ctx.optical_power),
        ("temperature", ctx.temperature),
        ("humidity", ctx.humidity),
        ("aux1", ctx.aux1),
        ("aux2", ctx.aux2),
        ("concentration", ctx.concentration),
    ] {
        if let Some(v) = value.filter(|v| !v.is_finite()) {
            return Err(format!("context field {name} is {v}"));
        }
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DecayError> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp).map_err(|e| DecayError::storage(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes).map_err(|e| DecayError::storage(&tmp, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| DecayError::storage(&tmp, e.into_error()))?;
        file.sync_all().map_err(|e| DecayError::storage(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| DecayError::storage(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(index: u64) -> SweepRecord {
        let at = Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(index as i64 * 150);
        SweepRecord::new(
            "1519905600",
            index,
            at,
            1e4,
            vec![1.0, 0.5, 0.25, 0.125],
            SweepContext {
                drive_current: Some(0.5),
                temperature: Some(21.0),
                medium: Some("Water".to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn persist_then_load_preserves_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let rec = record(3);
        let path = store.persist(&rec).unwrap();

        assert!(path.starts_with(store.raw_dir("1519905600")));
        assert_eq!(store.load(&path).unwrap(), rec);
        assert_eq!(store.locate("1519905600", 3).unwrap(), Some(path));
        assert_eq!(store.locate("1519905600", 4).unwrap(), None);
    }

    #[test]
    fn container_has_log_and_data_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let path = store.persist(&record(0)).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["log"]["sweep_index"], 0);
        assert_eq!(value["log"]["sample_count"], 4);
        assert_eq!(value["log"]["medium"], "Water");
        assert_eq!(value["data"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn list_is_sorted_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        for i in [2, 0, 1] {
            store.persist(&record(i)).unwrap();
        }
        fs::write(store.raw_dir("1519905600").join("notes.txt"), "hi").unwrap();

        let files = store.list("1519905600").unwrap();
        assert_eq!(files.len(), 3);
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[test]
    fn truncated_container_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let path = store.persist(&record(0)).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(store.load(&path), Err(DecayError::RecordCorrupt { .. })));
    }

    #[test]
    fn sample_count_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let path = store.persist(&record(0)).unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["log"]["sample_count"] = serde_json::json!(99);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();
        let err = store.load(&path).unwrap_err();
        assert!(err.to_string().contains("sample_count=99"));
    }

    #[test]
    fn non_finite_samples_are_refused_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let mut rec = record(0);
        rec.samples = vec![1.0, f64::NAN, 0.5, f64::INFINITY];

        let err = store.persist(&rec).unwrap_err();
        assert!(matches!(err, DecayError::RecordCorrupt { .. }));
        assert!(err.to_string().contains("sample 1 is NaN"));
        // Nothing reaches the folder, so aggregation never sees an unloadable container.
        assert!(store.list("1519905600").unwrap().is_empty());
    }

    #[test]
    fn non_finite_context_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let mut rec = record(0);
        rec.context.temperature = Some(f64::NAN);
        let err = store.persist(&rec).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn aggregate_write_failure_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        // A plain file where the measurement folder should be.
        fs::write(dir.path().join("m1"), "not a folder").unwrap();
        let table = AggregateTable {
            measurement_id: "m1".to_string(),
            rows: Vec::new(),
        };
        let err = store.write_aggregate(&table).unwrap_err();
        assert!(matches!(err, DecayError::Storage { .. }));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn missing_measurement_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        assert!(matches!(store.list("nope"), Err(DecayError::Storage { .. })));
    }
}
