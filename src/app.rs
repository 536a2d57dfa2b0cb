//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs logging
//! - parses CLI arguments
//! - converts them into acquisition / aggregation configs
//! - runs the loop and/or the folder aggregator
//! - prints summaries

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::acquire::{
    AcquisitionConfig, AcquisitionLoop, AcquisitionSummary, Rig, SimulatedDecay, SimulatedDigitizer,
    SimulatedLaser, SimulatedSensor, StopSignal,
};
use crate::aggregate::{AggregateConfig, AggregateReport, FolderAggregator};
use crate::cli::{CaptureArgs, Cli, Command, FitArgs};
use crate::domain::{ExecutionMode, Preprocess, SweepBound, SweepContext};
use crate::error::{AppError, DecayError};
use crate::fit::FitOptions;
use crate::io::JsonSweepStore;

/// Optical watts per drive amp of the simulated laser diode.
const SIM_WATTS_PER_AMP: f64 = 0.8;

/// Entry point for the `decaylab` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let store = JsonSweepStore::new(&cli.data_dir);

    match cli.command {
        Command::Acquire(args) => {
            let id = args.measurement_id.unwrap_or_else(default_measurement_id);
            let summary = handle_acquire(&store, &id, &args.capture, interrupt_signal())?;
            println!("{}", crate::report::format_acquisition_summary(&summary));
        }
        Command::Analyze(args) => {
            let report = handle_analyze(&store, &args.measurement_id, &args.fit)?;
            println!("{}", crate::report::format_aggregate_summary(&report, args.fit.preview));
        }
        Command::Run(args) => {
            let id = args.measurement_id.unwrap_or_else(default_measurement_id);
            let summary = handle_acquire(&store, &id, &args.capture, interrupt_signal())?;
            println!("{}", crate::report::format_acquisition_summary(&summary));
            let report = handle_analyze(&store, &id, &args.fit)?;
            println!("{}", crate::report::format_aggregate_summary(&report, args.fit.preview));
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Stop signal raised by Ctrl-C. The in-flight sweep finishes and the rig is
/// closed before the binary exits.
fn interrupt_signal() -> StopSignal {
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    let installed = ctrlc::set_handler(move || {
        if !handler_stop.is_stopped() {
            info!("interrupt received; finishing the current sweep");
        }
        handler_stop.stop();
    });
    if let Err(err) = installed {
        warn!(%err, "could not install Ctrl-C handler; interrupts will not stop cleanly");
    }
    stop
}

fn default_measurement_id() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

pub fn handle_acquire(
    store: &JsonSweepStore,
    measurement_id: &str,
    args: &CaptureArgs,
    stop: StopSignal,
) -> Result<AcquisitionSummary, AppError> {
    let config = acquisition_config_from_args(measurement_id, args)?;
    let rig = simulated_rig_from_args(args)?;
    let mut acquisition = AcquisitionLoop::new(config, rig, store)?.with_stop_signal(stop);
    Ok(acquisition.run()?)
}

pub fn handle_analyze(
    store: &JsonSweepStore,
    measurement_id: &str,
    args: &FitArgs,
) -> Result<AggregateReport, AppError> {
    let config = aggregate_config_from_args(measurement_id, args);
    let report = FolderAggregator::new(store, config)?.aggregate()?;
    if report.table.is_empty() && !report.errors.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "No usable sweeps in '{}' ({} file(s) skipped).",
                store.raw_dir(measurement_id).display(),
                report.errors.len()
            ),
        ));
    }
    Ok(report)
}

pub fn acquisition_config_from_args(
    measurement_id: &str,
    args: &CaptureArgs,
) -> Result<AcquisitionConfig, DecayError> {
    let bound = match (args.count, args.duration_secs) {
        (Some(n), None) => SweepBound::Count(n),
        (None, Some(secs)) => SweepBound::Duration(secs_to_duration("duration-secs", secs)?),
        _ => {
            return Err(DecayError::InvalidConfig(
                "exactly one of --count or --duration-secs is required".to_string(),
            ));
        }
    };

    let mut config = AcquisitionConfig::new(measurement_id, bound);
    config.dwell = secs_to_duration("dwell-secs", args.dwell_secs)?;
    config.ready_timeout = secs_to_duration("ready-timeout-secs", args.ready_timeout_secs)?;
    config.context = SweepContext {
        chip: args.chip.clone(),
        medium: args.medium.clone(),
        concentration: args.concentration,
        ..Default::default()
    };
    config.validate()?;
    Ok(config)
}

pub fn simulated_rig_from_args(args: &CaptureArgs) -> Result<Rig, DecayError> {
    let digitizer = SimulatedDigitizer::open(SimulatedDecay {
        tau_ms: args.sim_tau,
        noise_sigma: args.sim_noise,
        sample_rate: args.sim_sample_rate,
        sample_count: args.sim_samples,
        capture_time: Duration::from_millis(args.sim_capture_ms),
        seed: args.seed,
        ..Default::default()
    })?;
    let mut rig = Rig::new(Box::new(digitizer)).with_sensor(Box::new(SimulatedSensor::default()));
    if let Some(current) = args.current {
        rig = rig.with_laser(Box::new(SimulatedLaser::new(current, SIM_WATTS_PER_AMP)));
    }
    Ok(rig)
}

pub fn aggregate_config_from_args(measurement_id: &str, args: &FitArgs) -> AggregateConfig {
    let mode = if args.parallel || args.workers.is_some() {
        ExecutionMode::Parallel {
            workers: args.workers,
        }
    } else {
        ExecutionMode::Sequential
    };
    AggregateConfig {
        measurement_id: measurement_id.to_string(),
        mode,
        preprocess: Preprocess {
            pump_delay_ms: args.pump_delay,
            reject_start_ms: args.reject_start,
            reject_end_ms: args.reject_end,
        },
        fit: FitOptions {
            max_iterations: args.max_iterations,
            ..Default::default()
        },
    }
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration, DecayError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| DecayError::InvalidConfig(format!("--{name} {secs} is not a valid duration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("decaylab").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn count_and_duration_are_exclusive() {
        assert!(Cli::try_parse_from(["decaylab", "acquire"]).is_err());
        assert!(Cli::try_parse_from(["decaylab", "acquire", "--count", "3", "--duration-secs", "1"]).is_err());

        let cli = parse(&["acquire", "--duration-secs", "1.5", "--dwell-secs", "0.5"]);
        let Command::Acquire(args) = cli.command else {
            panic!("expected acquire");
        };
        let config = acquisition_config_from_args("m1", &args.capture).unwrap();
        assert_eq!(config.bound, SweepBound::Duration(Duration::from_millis(1500)));
        assert_eq!(config.dwell, Duration::from_millis(500));
        assert_eq!(config.ready_timeout, Duration::from_secs(5));
    }

    #[test]
    fn negative_duration_is_invalid_config() {
        let cli = parse(&["acquire", "--count", "2", "--dwell-secs", "-1"]);
        let Command::Acquire(args) = cli.command else {
            panic!("expected acquire");
        };
        let err = acquisition_config_from_args("m1", &args.capture).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn workers_imply_parallel() {
        let cli = parse(&["analyze", "--measurement-id", "m1", "--workers", "4", "--pump-delay", "0.2"]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let config = aggregate_config_from_args(&args.measurement_id, &args.fit);
        assert_eq!(config.mode, ExecutionMode::Parallel { workers: Some(4) });
        assert_eq!(config.preprocess.pump_delay_ms, 0.2);
        assert_eq!(config.fit.max_iterations, 200);

        let cli = parse(&["analyze", "--measurement-id", "m1"]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(
            aggregate_config_from_args("m1", &args.fit).mode,
            ExecutionMode::Sequential
        );
    }

    #[test]
    fn acquire_then_analyze_on_simulated_rig() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let cli = parse(&[
            "run",
            "--count",
            "4",
            "--sim-capture-ms",
            "1",
            "--sim-samples",
            "400",
            "--sim-tau",
            "5",
            "--current",
            "0.5",
            "--medium",
            "Water",
            "--parallel",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let summary = handle_acquire(&store, "sim-1", &args.capture, StopSignal::new()).unwrap();
        assert_eq!(summary.sweeps_captured, 4);
        assert_eq!(summary.persisted.len(), 4);

        let report = handle_analyze(&store, "sim-1", &args.fit).unwrap();
        assert_eq!(report.table.len(), 4);
        assert!(report.errors.is_empty());
        for row in &report.table.rows {
            assert!(row.fit.fit_ok);
            assert!((row.fit.tau - 5.0).abs() < 0.5, "tau={}", row.fit.tau);
            assert_eq!(row.context.medium.as_deref(), Some("Water"));
            assert_eq!(row.context.drive_current, Some(0.5));
        }
        assert!(store.aggregate_path("sim-1").exists());
    }

    #[test]
    fn interrupted_acquire_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let cli = parse(&["acquire", "--duration-secs", "60", "--sim-capture-ms", "1", "--sim-samples", "50"]);
        let Command::Acquire(args) = cli.command else {
            panic!("expected acquire");
        };

        // What the Ctrl-C handler does when the operator interrupts.
        let stop = StopSignal::new();
        let raiser = stop.clone();
        let interrupter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            raiser.stop();
        });

        let summary = handle_acquire(&store, "sim-int", &args.capture, stop).unwrap();
        interrupter.join().unwrap();

        assert_eq!(summary.stop_reason, crate::domain::StopReason::Cancelled);
        assert!(summary.elapsed < Duration::from_secs(5));
        assert_eq!(summary.persisted.len() as u64, summary.sweeps_captured);
        // No half-written containers left behind.
        let leftovers = std::fs::read_dir(store.raw_dir("sim-int"))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
                    .count()
            })
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn analyze_missing_measurement_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSweepStore::new(dir.path());
        let cli = parse(&["analyze", "--measurement-id", "nope"]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let err = handle_analyze(&store, "nope", &args.fit).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
