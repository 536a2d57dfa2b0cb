//! Command-line parsing for the decay-measurement DAQ.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the acquisition/fitting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "decaylab", version, about = "Decay-lifetime acquisition and analysis")]
pub struct Cli {
    /// Root folder holding one sub-folder per measurement.
    #[arg(long, env = "DECAYLAB_DATA_DIR", default_value = "Data", global = true)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture sweeps into a measurement folder (simulated rig).
    Acquire(AcquireArgs),
    /// Fit every sweep of a measurement and write `analysis.csv`.
    Analyze(AnalyzeArgs),
    /// Acquire, then analyze the same measurement.
    Run(RunArgs),
}

#[derive(Debug, Args, Clone)]
pub struct AcquireArgs {
    /// Measurement id (defaults to the start time).
    #[arg(long)]
    pub measurement_id: Option<String>,

    #[command(flatten)]
    pub capture: CaptureArgs,
}

#[derive(Debug, Args, Clone)]
pub struct AnalyzeArgs {
    /// Measurement id (folder name under the data root).
    #[arg(long)]
    pub measurement_id: String,

    #[command(flatten)]
    pub fit: FitArgs,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Measurement id (defaults to the start time).
    #[arg(long)]
    pub measurement_id: Option<String>,

    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub fit: FitArgs,
}

/// Acquisition bound, cadence, and the simulated rig.
#[derive(Debug, Args, Clone)]
pub struct CaptureArgs {
    /// Capture exactly N sweeps.
    #[arg(long, conflicts_with = "duration_secs", required_unless_present = "duration_secs")]
    pub count: Option<u64>,

    /// Keep starting sweeps for this many seconds.
    #[arg(long)]
    pub duration_secs: Option<f64>,

    /// Seconds between auxiliary sensor refreshes.
    #[arg(long, default_value_t = 3.0)]
    pub dwell_secs: f64,

    /// Give up on a capture after this many seconds without data-ready.
    #[arg(long, default_value_t = 5.0)]
    pub ready_timeout_secs: f64,

    /// Simulated decay lifetime (ms).
    #[arg(long, default_value_t = 5.0)]
    pub sim_tau: f64,

    /// Simulated noise standard deviation.
    #[arg(long, default_value_t = 0.01)]
    pub sim_noise: f64,

    /// Simulated sample rate (Hz).
    #[arg(long, default_value_t = 1e4)]
    pub sim_sample_rate: f64,

    /// Samples per simulated sweep.
    #[arg(long, default_value_t = 1200)]
    pub sim_samples: usize,

    /// Simulated capture time per sweep (ms).
    #[arg(long, default_value_t = 120)]
    pub sim_capture_ms: u64,

    /// Random seed for the simulated waveform noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Laser drive current (A). Enables the simulated laser driver.
    #[arg(long)]
    pub current: Option<f64>,

    /// Chip label recorded with every sweep.
    #[arg(long)]
    pub chip: Option<String>,

    /// Medium label recorded with every sweep.
    #[arg(long)]
    pub medium: Option<String>,

    /// Analyte concentration recorded with every sweep.
    #[arg(long)]
    pub concentration: Option<f64>,
}

/// Aggregation and fitting options.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Fit files in parallel.
    #[arg(long)]
    pub parallel: bool,

    /// Worker threads for parallel fitting (implies --parallel).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Pump delay subtracted from the time axis (ms).
    #[arg(long, default_value_t = 0.0)]
    pub pump_delay: f64,

    /// Drop samples within this many ms of the start.
    #[arg(long, default_value_t = 0.0)]
    pub reject_start: f64,

    /// Drop samples within this many ms of the end.
    #[arg(long, default_value_t = 0.0)]
    pub reject_end: f64,

    /// Levenberg-Marquardt iteration budget per fit.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Rows to preview in the terminal summary.
    #[arg(long, default_value_t = 10)]
    pub preview: usize,
}
