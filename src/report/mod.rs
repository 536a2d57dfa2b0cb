//! Formatted terminal output for acquisition runs and aggregation passes.
//!
//! We keep formatting code in one place so:
//! - the acquisition and fitting code stays clean and testable
//! - output changes are localized

use crate::acquire::AcquisitionSummary;
use crate::aggregate::AggregateReport;
use crate::domain::{AggregateRow, StopReason};
use crate::math::mean_std;

/// Format the end-of-run summary of an acquisition.
pub fn format_acquisition_summary(summary: &AcquisitionSummary) -> String {
    let mut out = String::new();

    out.push_str("=== decaylab - acquisition ===\n");
    out.push_str(&format!("Measurement: {}\n", summary.measurement_id));
    out.push_str(&format!(
        "Sweeps: {} captured | {} persisted | {} write failure(s)\n",
        summary.sweeps_captured,
        summary.persisted.len(),
        summary.write_failures.len()
    ));
    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        summary.sweeps_captured as f64 / secs
    } else {
        0.0
    };
    out.push_str(&format!("Elapsed: {secs:.3}s ({rate:.2} sweeps/s)\n"));
    out.push_str(&format!("Stopped: {}\n", stop_reason_label(summary.stop_reason)));

    if let (Some(peak), Some(last)) = (
        summary.accumulated.iter().copied().reduce(f64::max),
        summary.accumulated.last(),
    ) {
        out.push_str(&format!(
            "Accumulated waveform: {} samples | peak={peak:.4} | tail={last:.4}\n",
            summary.accumulated.len()
        ));
    }

    for failure in &summary.write_failures {
        out.push_str(&format!("  (not saved) sweep {}: {}\n", failure.sweep_index, failure.message));
    }

    out
}

/// Format the summary of one aggregation pass.
pub fn format_aggregate_summary(report: &AggregateReport, preview_rows: usize) -> String {
    let table = &report.table;
    let mut out = String::new();

    out.push_str("=== decaylab - analysis ===\n");
    out.push_str(&format!("Measurement: {}\n", table.measurement_id));
    out.push_str(&format!(
        "Rows: n={} | fit failures={} | skipped files={}\n",
        table.len(),
        table.fit_failures(),
        report.errors.len()
    ));

    if let (Some(first), Some(last)) = (table.rows.first(), table.rows.last()) {
        let span = last.captured_at - first.captured_at;
        out.push_str(&format!(
            "Span: {} -> {} ({:.3}s)\n",
            first.captured_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            last.captured_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            span.num_milliseconds() as f64 / 1e3
        ));
    }

    let ok = || table.rows.iter().filter(|r| r.fit.fit_ok);
    out.push_str("\nFit parameters (successful fits):\n");
    out.push_str(&fmt_stat("tau (ms)", mean_std(ok().map(|r| r.fit.tau))));
    out.push_str(&fmt_stat("A", mean_std(ok().map(|r| r.fit.amplitude))));
    out.push_str(&fmt_stat("c", mean_std(ok().map(|r| r.fit.offset))));
    out.push_str(&fmt_stat("rmse", mean_std(ok().map(|r| r.fit.rmse))));

    if preview_rows > 0 && !table.is_empty() {
        out.push_str(&format!("\nFirst {} row(s):\n", preview_rows.min(table.len())));
        out.push_str(&format_table(&table.rows[..preview_rows.min(table.len())]));
    }

    if !report.errors.is_empty() {
        out.push_str("\nSkipped files:\n");
        for e in &report.errors {
            out.push_str(&format!("  {}: {}\n", e.source, e.message));
        }
    }

    out.push_str(&format!("\nWrote {}\n", report.output.display()));
    out
}

fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::CountReached => "sweep count reached",
        StopReason::DeadlineReached => "duration elapsed",
        StopReason::Cancelled => "cancelled",
    }
}

fn fmt_stat(label: &str, stat: Option<(f64, f64)>) -> String {
    match stat {
        Some((mean, std)) => format!("- {label:<9}: {mean:.6} ± {std:.6}\n"),
        None => format!("- {label:<9}: n/a\n"),
    }
}

fn format_table(rows: &[AggregateRow]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>5} {:>7} {:<26} {:>12} {:>12} {:>12} {:<6}\n",
            "row", "sweep", "source", "A", "tau", "c", "fit"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<5} {:-<7} {:-<26} {:-<12} {:-<12} {:-<12} {:-<6}\n",
            "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:>5} {:>7} {:<26} {:>12.6} {:>12.6} {:>12.6} {:<6}\n",
                r.row,
                r.sweep_index,
                truncate(&r.source, 26),
                r.fit.amplitude,
                r.fit.tau,
                r.fit.offset,
                if r.fit.fit_ok { "ok" } else { "FAIL" },
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::acquire::WriteFailure;
    use crate::domain::{AggregateTable, FileError, FitResult, SweepContext};

    fn row(i: usize, tau: f64, ok: bool) -> AggregateRow {
        let fit = if ok {
            FitResult {
                amplitude: 2.0,
                tau,
                offset: 0.1,
                fit_ok: true,
                errors: None,
                rmse: 0.01,
                iterations: 6,
                failure: None,
            }
        } else {
            FitResult::failed(0, "Degenerate signal: flat")
        };
        AggregateRow {
            row: i,
            captured_at: Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, 0).unwrap()
                + chrono::Duration::milliseconds(i as i64 * 500),
            measurement_id: "m1".to_string(),
            sweep_index: i as u64,
            sample_rate: 1e4,
            sample_count: 1200,
            context: SweepContext::default(),
            fit,
            source: format!("sweep_{i:06}_1519905600000000.json"),
        }
    }

    #[test]
    fn aggregate_summary_skips_failed_fits_in_stats() {
        let report = AggregateReport {
            table: AggregateTable {
                measurement_id: "m1".to_string(),
                rows: vec![row(0, 2.0, true), row(1, 4.0, true), row(2, 0.0, false)],
            },
            errors: vec![FileError {
                source: "sweep_000003_x.json".to_string(),
                message: "Corrupt sweep record".to_string(),
            }],
            output: PathBuf::from("Data/m1/analysis.csv"),
        };
        let text = format_aggregate_summary(&report, 2);
        assert!(text.contains("Rows: n=3 | fit failures=1 | skipped files=1"));
        assert!(text.contains("tau (ms) : 3.000000"));
        assert!(text.contains("Span: 2018-03-01 12:00:00.000 -> 2018-03-01 12:00:01.000 (1.000s)"));
        assert!(text.contains("First 2 row(s)"));
        assert!(text.contains("sweep_000003_x.json: Corrupt sweep record"));
        assert!(text.ends_with("Wrote Data/m1/analysis.csv\n"));
    }

    #[test]
    fn empty_aggregate_reports_na() {
        let report = AggregateReport {
            table: AggregateTable {
                measurement_id: "m1".to_string(),
                rows: Vec::new(),
            },
            errors: Vec::new(),
            output: PathBuf::from("analysis.csv"),
        };
        let text = format_aggregate_summary(&report, 5);
        assert!(text.contains("tau (ms) : n/a"));
        assert!(!text.contains("row(s)"));
    }

    #[test]
    fn acquisition_summary_lists_write_failures() {
        let summary = AcquisitionSummary {
            measurement_id: "m1".to_string(),
            stop_reason: StopReason::CountReached,
            sweeps_captured: 3,
            persisted: vec![PathBuf::from("a"), PathBuf::from("b")],
            write_failures: vec![WriteFailure {
                sweep_index: 1,
                message: "disk full".to_string(),
            }],
            elapsed: Duration::from_secs(2),
            accumulated: vec![3.0, 1.5, 0.3],
        };
        let text = format_acquisition_summary(&summary);
        assert!(text.contains("Sweeps: 3 captured | 2 persisted | 1 write failure(s)"));
        assert!(text.contains("Stopped: sweep count reached"));
        assert!(text.contains("peak=3.0000 | tail=0.3000"));
        assert!(text.contains("sweep 1: disk full"));
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 4), "abc.");
    }
}
