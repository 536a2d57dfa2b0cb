//! Folder aggregator.
//!
//! Per container: load -> time axis -> condition -> fit -> row. Files are
//! processed independently, sequentially or fanned out on a rayon pool; rows are
//! sorted afterwards so the output does not depend on the execution mode.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::domain::{
    AggregateRow, AggregateTable, ExecutionMode, FileError, Preprocess, validate_measurement_id,
};
use crate::error::DecayError;
use crate::fit::{DecayFitter, FitOptions, condition};
use crate::io::SweepStore;

#[derive(Debug, Clone)]
pub struct AggregateConfig {
    pub measurement_id: String,
    pub mode: ExecutionMode,
    pub preprocess: Preprocess,
    pub fit: FitOptions,
}

impl AggregateConfig {
    pub fn new(measurement_id: impl Into<String>) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            mode: ExecutionMode::default(),
            preprocess: Preprocess::default(),
            fit: FitOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<(), DecayError> {
        validate_measurement_id(&self.measurement_id)?;
        if let ExecutionMode::Parallel { workers: Some(0) } = self.mode {
            return Err(DecayError::InvalidConfig("workers must be >= 1".to_string()));
        }
        self.preprocess.validate()?;
        self.fit.validate()
    }
}

/// Result of one aggregation pass.
#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub table: AggregateTable,
    /// Containers that produced no row, sorted by file name.
    pub errors: Vec<FileError>,
    /// Where the aggregate artifact was written.
    pub output: PathBuf,
}

pub struct FolderAggregator<'a, S: SweepStore + ?Sized> {
    store: &'a S,
    config: AggregateConfig,
    fitter: DecayFitter,
}

impl<'a, S: SweepStore + ?Sized> FolderAggregator<'a, S> {
    pub fn new(store: &'a S, config: AggregateConfig) -> Result<Self, DecayError> {
        config.validate()?;
        let fitter = DecayFitter::new(config.fit.clone());
        Ok(Self {
            store,
            config,
            fitter,
        })
    }

    pub fn config(&self) -> &AggregateConfig {
        &self.config
    }

    /// Fit every container of the measurement and write the aggregate artifact.
    ///
    /// Per-file failures end up in `errors`; only listing the folder or writing
    /// the artifact can fail the whole pass.
    pub fn aggregate(&self) -> Result<AggregateReport, DecayError> {
        let id = &self.config.measurement_id;
        let files = self.store.list(id)?;
        info!(measurement_id = %id, files = files.len(), mode = ?self.config.mode, "aggregating");

        let outcomes = self.process_all(&files)?;

        let mut rows = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!(source = %err.source, message = %err.message, "sweep skipped");
                    errors.push(err);
                }
            }
        }

        rows.sort_by(row_order);
        for (i, row) in rows.iter_mut().enumerate() {
            row.row = i;
        }
        errors.sort_by(|a, b| a.source.cmp(&b.source));

        let table = AggregateTable {
            measurement_id: id.clone(),
            rows,
        };
        let output = self.store.write_aggregate(&table)?;
        info!(
            rows = table.len(),
            fit_failures = table.fit_failures(),
            skipped = errors.len(),
            output = %output.display(),
            "aggregate written"
        );
        Ok(AggregateReport {
            table,
            errors,
            output,
        })
    }

    fn process_all(&self, files: &[PathBuf]) -> Result<Vec<Result<AggregateRow, FileError>>, DecayError> {
        match self.config.mode {
            ExecutionMode::Sequential => Ok(files.iter().map(|p| self.process_file(p)).collect()),
            ExecutionMode::Parallel { workers: None } => {
                Ok(files.par_iter().map(|p| self.process_file(p)).collect())
            }
            ExecutionMode::Parallel { workers: Some(n) } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| DecayError::InvalidConfig(format!("failed to build worker pool: {e}")))?;
                Ok(pool.install(|| files.par_iter().map(|p| self.process_file(p)).collect()))
            }
        }
    }

    fn process_file(&self, path: &Path) -> Result<AggregateRow, FileError> {
        let source = source_name(path);
        let file_error = |err: DecayError| FileError {
            source: source.clone(),
            message: err.to_string(),
        };

        let record = self.store.load(path).map_err(file_error)?;
        let t = record.time_axis_ms();
        let (t, y) = condition(&t, &record.samples, &self.config.preprocess);
        let fit = self.fitter.fit(&t, &y).map_err(file_error)?;
        debug!(source = %source, tau = fit.tau, fit_ok = fit.fit_ok, "sweep fitted");

        Ok(AggregateRow {
            row: 0,
            captured_at: record.captured_at,
            sample_count: record.sample_count(),
            sample_rate: record.sample_rate,
            measurement_id: record.measurement_id,
            sweep_index: record.sweep_index,
            context: record.context,
            fit,
            source,
        })
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Total order on rows: capture time, then id, index and source as tie-breaks.
fn row_order(a: &AggregateRow, b: &AggregateRow) -> Ordering {
    a.captured_at
        .cmp(&b.captured_at)
        .then_with(|| a.measurement_id.cmp(&b.measurement_id))
        .then_with(|| a.sweep_index.cmp(&b.sweep_index))
        .then_with(|| a.source.cmp(&b.source))
}
