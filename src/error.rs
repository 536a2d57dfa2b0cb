use std::path::PathBuf;

use thiserror::Error;

/// Error raised by the acquisition and analysis core.
///
/// Per-item failures (one sweep write, one file, one fit) are isolated by the
/// callers; only collaborator faults abort an acquisition run.
#[derive(Debug, Error)]
pub enum DecayError {
    #[error("Insufficient data for a decay fit: len(t)={t_len}, len(y)={y_len} (need equal lengths > 3)")]
    InsufficientData { t_len: usize, y_len: usize },

    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),

    #[error("Fit did not converge: {0}")]
    FitNonConvergence(String),

    #[error("Corrupt sweep record '{}': {reason}", path.display())]
    RecordCorrupt { path: PathBuf, reason: String },

    #[error("Instrument fault: {0}")]
    InstrumentFault(String),

    #[error("Sensor fault: {0}")]
    SensorFault(String),

    #[error("Storage error at '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shutdown failed with {} error(s)", .0.len())]
    ShutdownFailed(Vec<DecayError>),
}

impl DecayError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DecayError::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DecayError::RecordCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            DecayError::InvalidConfig(_) => 2,
            DecayError::InsufficientData { .. } | DecayError::RecordCorrupt { .. } => 3,
            DecayError::DegenerateSignal(_) | DecayError::FitNonConvergence(_) => 4,
            DecayError::InstrumentFault(_)
            | DecayError::SensorFault(_)
            | DecayError::Storage { .. }
            | DecayError::ShutdownFailed(_) => 5,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<DecayError> for AppError {
    fn from(err: DecayError) -> Self {
        let mut message = err.to_string();
        if let DecayError::ShutdownFailed(inner) = &err {
            for e in inner {
                message.push_str(&format!("\n  - {e}"));
            }
        }
        AppError::new(err.exit_code(), message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
