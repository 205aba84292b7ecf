//! Caller side of the supervisor: where jobs come from and where their
//! artifacts go.

mod job;
mod runner;
mod transfer;

pub use job::*;
pub use runner::*;
pub use transfer::*;

pub use crate::supervisor::{NoopProgress, ProgressSink};

use crate::config::ConfigError;
use crate::supervisor::SupervisorError;
use crate::worker::LineError;

/// Error type for pipeline operations.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read job source: {0}")]
    Read(#[from] LineError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Spawn(#[from] SupervisorError),
    #[error(transparent)]
    InvalidUrl(#[from] ConfigError),
    #[error("Invalid file name: {0:?}")]
    InvalidFilename(String),
}
