//! Error types for zext-core
//!
//! Failures are split by the point at which they can happen:
//! [`BuildError`] before anything is queued, [`SubmitError`] while handing a
//! job to the executor, and [`StageError`] while a chain runs on a worker.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A request could not be turned into a runnable pipeline.
///
/// Nothing has been queued and no file has been touched when one of these is
/// returned.
#[derive(Error, Debug)]
pub enum BuildError {
    /// No registered provider handles this file name
    #[error("Unsupported format: {path} ({reason})")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// A provider accepts the destination but not the given source
    #[error(
        "Only {} files can be compressed to {} files: {destination}",
        accepted_sources.join(", "),
        accepted_destinations.join(", ")
    )]
    IncompatibleSourceForDestination {
        destination: PathBuf,
        accepted_sources: Vec<String>,
        accepted_destinations: Vec<String>,
    },

    /// An intermediate stage cannot be scanned and the destination is not empty
    #[error(
        "Piped extraction into a non-empty destination is unsafe: {} archives cannot be scanned for conflicts before they exist",
        risky_extensions.join(", ")
    )]
    PipedConflictRisk { risky_extensions: Vec<String> },

    /// The source file or directory does not exist
    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    /// The extraction destination exists and is not a directory
    #[error("Destination must be a directory: {0}")]
    DestinationNotDirectory(PathBuf),

    /// The compression destination carries no extension to pick a format from
    #[error("Destination has no archive extension: {0}")]
    MissingExtension(PathBuf),
}

/// The executor refused a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The bounded queue is at capacity
    #[error("Queue is full (limit {capacity})")]
    QueueFull { capacity: usize },

    /// Shutdown has begun; no new work is accepted
    #[error("Executor has been shut down")]
    ExecutorShutDown,
}

/// A stage failed while running. The remaining chain is abandoned.
#[derive(Error, Debug)]
pub enum StageError {
    /// The operating system denied access to a file
    #[error("Access denied: {path}: {source}")]
    AccessDenied { path: PathBuf, source: io::Error },

    /// The input is not a valid archive of the expected format
    #[error("Corrupt {format} data in {path}: {detail}")]
    FormatCorrupt {
        path: PathBuf,
        format: &'static str,
        detail: String,
    },

    /// Any other I/O failure
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// Cooperative cancellation was observed
    #[error("Task was cancelled")]
    Cancelled,

    /// The re-scan right before writing found files that would be overwritten
    #[error("{count} existing file(s) would be overwritten")]
    ConflictDetected { count: usize },

    /// The provider does not implement this operation
    #[error("{format} does not support {operation}")]
    Unsupported {
        format: &'static str,
        operation: &'static str,
    },
}

impl StageError {
    /// Classify an I/O error raised while reading or writing `path`.
    ///
    /// Decoder errors surface as `InvalidData`/`InvalidInput`/`UnexpectedEof`
    /// and are reported as corrupt input of `format`.
    pub fn from_io(err: io::Error, path: &Path, format: &'static str) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => StageError::AccessDenied {
                path: path.to_path_buf(),
                source: err,
            },
            io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof => StageError::FormatCorrupt {
                path: path.to_path_buf(),
                format,
                detail: err.to_string(),
            },
            _ => StageError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Plain I/O failure on `path`, only promoting permission errors.
    pub fn io(err: io::Error, path: &Path) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            StageError::AccessDenied {
                path: path.to_path_buf(),
                source: err,
            }
        } else {
            StageError::Io {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    /// Whether this error was caused by operator-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

impl From<walkdir::Error> for StageError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        StageError::io(err.into(), &path)
    }
}

/// Core error type for zext
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Pipeline could not be built
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Executor rejected the job
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// A stage failed
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Configuration-related error
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
