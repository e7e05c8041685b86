use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Failures of a remote retrieval. They are recoverable through the cache
/// fallback of the fetch policy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("Request to {target} failed"))]
    Http {
        target: String,
        source: reqwest::Error,
    },
    #[snafu(display("{target} answered with status {status}"))]
    Status { target: String, status: u16 },
    #[snafu(display(
        "Truncated download from {target}: expected {expected} bytes, received {received}"
    ))]
    Truncated {
        target: String,
        expected: u64,
        received: u64,
    },
    #[snafu(display("Download from {target} is not valid UTF-8"))]
    Encoding {
        target: String,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display("Could not read {target}"))]
    Io {
        target: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheError {
    #[snafu(display("Cache I/O error on {}", path.display()))]
    CacheIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Corrupted cache entry {}", path.display()))]
    CacheJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Could not move cache entry into place at {}", path.display()))]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

/// A single malformed row. Recorded and skipped, never fatal to a batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RowError {
    #[snafu(display("line {line}: expected {expected} fields, found {found}"))]
    TooFewFields {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[snafu(display("line {line}: missing required field {field}"))]
    MissingField { line: u64, field: &'static str },
    #[snafu(display("line {line}: field {field} is not a number: {value:?}"))]
    BadNumber {
        line: u64,
        field: &'static str,
        value: String,
    },
    #[snafu(display("line {line}: {source}"))]
    Csv { line: u64, source: csv::Error },
}

impl RowError {
    pub fn line(&self) -> u64 {
        match self {
            RowError::TooFewFields { line, .. }
            | RowError::MissingField { line, .. }
            | RowError::BadNumber { line, .. }
            | RowError::Csv { line, .. } => *line,
        }
    }
}

/// Errors that abort a whole pipeline run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("Could not fetch source {name}"))]
    Fetch { name: String, source: FetchError },
    #[snafu(display("Cache store unavailable"))]
    Cache { source: CacheError },
    #[snafu(display("Invalid settings: {reason}"))]
    InvalidSettings { reason: String },
}

/// A recoverable condition left on the graph for the caller to inspect.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Issue {
    /// A row of a source could not be parsed and was dropped.
    Parse {
        source: String,
        line: u64,
        reason: String,
    },
    /// An entity could not be joined to its counterpart.
    UnresolvedEntity { id: String, reason: String },
    /// A record lacks a field required to identify it.
    Configuration {
        source: String,
        line: u64,
        reason: String,
    },
    /// An optional source could be served neither live nor from the cache.
    Unavailable { source: String, reason: String },
}
