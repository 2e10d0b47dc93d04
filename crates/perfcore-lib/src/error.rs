//! Error types for the analysis engine
//!
//! Only unrecoverable conditions live here. Missing metrics, derivation
//! gaps and failed benchmark levels are represented as absent values in
//! the data model instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed roofline record {}: {reason}", path.display())]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("benchmark `{kernel}` failed: {reason}")]
    Benchmark { kernel: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn benchmark(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Benchmark {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }
}
