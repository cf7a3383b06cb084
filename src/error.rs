//! Error types for each stage of a sweep

use std::path::PathBuf;
use thiserror::Error;

/// A single input record that could not be turned into a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Line has an address but no port field
    #[error("line {line}: expected `address,port`, got {raw:?}")]
    MissingPort { line: usize, raw: String },

    /// Port field is not an integer in 1..=65535
    #[error("line {line}: invalid port {port:?}")]
    InvalidPort { line: usize, port: String },

    #[error("line {line}: not valid UTF-8")]
    InvalidUtf8 { line: usize },
}

/// Failures opening or reading the candidate list.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input file {} not found", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures inside one verification stage. These never escape the policy;
/// they become a non-active outcome for that stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("upstream answered {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("invalid verification url: {0}")]
    Url(String),
}

/// Failures persisting verdicts. Fatal for the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can end a run early.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to open geo database {}: {message}", .path.display())]
    Geo { path: PathBuf, message: String },

    #[error("failed to build probe stages: {0}")]
    Stage(#[from] StageError),

    #[error("result writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RunError {
    /// True when the run stopped because the input list does not exist.
    pub fn is_source_missing(&self) -> bool {
        matches!(self, RunError::Source(SourceError::Missing(_)))
    }
}
