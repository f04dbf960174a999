use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("Step rejected for job {job_id}: {reason}")]
    StepRejected { job_id: String, reason: String },

    #[error(transparent)]
    Transfer(#[from] TransferStall),

    #[error("{0}")]
    Other(String),
}

/// Why a candidate never reached a stable state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferStall {
    #[error("{path} did not appear within {waited:?}")]
    NeverAppeared { path: PathBuf, waited: Duration },

    #[error("{path} size still changing after {waited:?}")]
    NeverSettled { path: PathBuf, waited: Duration },

    #[error("{path} vanished while settling")]
    Vanished { path: PathBuf },

    #[error("wait for {path} cancelled")]
    Cancelled { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;
