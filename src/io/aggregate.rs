//! Aggregate table export to CSV.
//!
//! The CSV is the canonical per-measurement artifact. Output is a pure function
//! of the (sorted) table, so re-running aggregation reproduces it byte for byte.

use chrono::SecondsFormat;

use std::io;

use crate::domain::AggregateTable;

pub const AGGREGATE_HEADER: [&str; 27] = [
    "row",
    "datetime",
    "measurement_id",
    "sweep_index",
    "sample_rate",
    "sample_count",
    "current",
    "optical_power",
    "temperature",
    "humidity",
    "aux1",
    "aux2",
    "concentration",
    "medium",
    "chip",
    "A",
    "tau",
    "c",
    "A_err",
    "tau_err",
    "c_err",
    "rmse",
    "iterations",
    "fit_ok",
    "failure",
    "source",
    "time_unit",
];

/// Render an aggregate table as CSV bytes.
///
/// Encoding failures surface as `io::Error`; the store attaches the target path.
pub fn aggregate_csv_bytes(table: &AggregateTable) -> io::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(AGGREGATE_HEADER)?;
    for r in &table.rows {
        let ctx = &r.context;
        let fit = &r.fit;
        let errors = fit.errors;
        writer
            .write_record([
                r.row.to_string(),
                r.captured_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                r.measurement_id.clone(),
                r.sweep_index.to_string(),
                fmt_f64(r.sample_rate),
                r.sample_count.to_string(),
                fmt_opt(ctx.drive_current),
                fmt_opt(ctx.optical_power),
                fmt_opt(ctx.temperature),
                fmt_opt(ctx.humidity),
                fmt_opt(ctx.aux1),
                fmt_opt(ctx.aux2),
                fmt_opt(ctx.concentration),
                ctx.medium.clone().unwrap_or_default(),
                ctx.chip.clone().unwrap_or_default(),
                fmt_f64(fit.amplitude),
                fmt_f64(fit.tau),
                fmt_f64(fit.offset),
                fmt_opt(errors.map(|e| e.amplitude)),
                fmt_opt(errors.map(|e| e.tau)),
                fmt_opt(errors.map(|e| e.offset)),
                fmt_f64(fit.rmse),
                fit.iterations.to_string(),
                fit.fit_ok.to_string(),
                fit.failure.clone().unwrap_or_default(),
                r.source.clone(),
                "ms".to_string(),
            ])?;
    }

    writer.into_inner().map_err(|e| e.into_error())
}

fn fmt_f64(v: f64) -> String {
    if v.is_nan() { "NaN".to_string() } else { v.to_string() }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(fmt_f64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AggregateRow, FitResult, SweepContext};
    use chrono::{TimeZone, Utc};

    fn row(row: usize, fit: FitResult) -> AggregateRow {
        AggregateRow {
            row,
            captured_at: Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, row as u32).unwrap(),
            measurement_id: "m1".to_string(),
            sweep_index: row as u64,
            sample_rate: 1e4,
            sample_count: 1200,
            context: SweepContext {
                drive_current: Some(0.5),
                medium: Some("Water".to_string()),
                ..Default::default()
            },
            fit,
            source: format!("sweep_{row:06}_0.json"),
        }
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let ok = FitResult {
            amplitude: 8.0,
            tau: 2.0,
            offset: 2.0,
            fit_ok: true,
            errors: None,
            rmse: 0.01,
            iterations: 5,
            failure: None,
        };
        let table = AggregateTable {
            measurement_id: "m1".to_string(),
            rows: vec![row(0, ok), row(1, FitResult::failed(0, "flat"))],
        };
        let text = String::from_utf8(aggregate_csv_bytes(&table).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("row,datetime,measurement_id"));
        assert!(lines[1].contains(",8,2,2,"));
        assert!(lines[2].contains("NaN,NaN,NaN"));
        assert!(lines[2].contains(",false,flat,"));
    }
}
