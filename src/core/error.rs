//! Defines the custom error type for the `core` module.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The side effect in the submitted tree that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOperation {
    Copy,
    Delete,
}

impl fmt::Display for MirrorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorOperation::Copy => f.write_str("copy"),
            MirrorOperation::Delete => f.write_str("delete"),
        }
    }
}

/// The primary error type for the `core` module.
///
/// Every variant that touches the file system carries the path involved so a
/// caller can show the user exactly what went wrong and where.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A folder or file could not be read while scanning the bill folder.
    /// Scans report these per path and keep going.
    #[error("Could not scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The GST submitted root could not be read. Only the GST-driven part of a
    /// reconciliation is aborted; manual tracking keeps working.
    #[error("Could not read GST submitted folder {path}: {source}")]
    Match {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tracking or configuration state could not be written (or read back).
    /// The in-memory state is kept so the write can be retried.
    #[error("Could not persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted document exists but is not valid JSON for its type.
    #[error("Malformed data in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Copying into or deleting from the submitted tree failed.
    #[error("Mirror {operation} failed for {path}: {source}")]
    Mirror {
        operation: MirrorOperation,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid month '{0}', expected YYYY-MM")]
    InvalidMonth(String),

    /// Represents a path that was expected to be a directory but was not.
    #[error("Path is not a valid directory: {0}")]
    NotADirectory(PathBuf),

    #[error("No root folder has been selected")]
    NoRootSelected,

    /// The path does not point at a readable bill file.
    #[error("Not a readable bill file: {0}")]
    UnknownFile(PathBuf),

    /// A reconciliation is already in flight on this engine.
    #[error("A reconciliation is already running")]
    Busy,

    /// Represents an error that occurred when a Tokio task was joined.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn mirror(
        operation: MirrorOperation,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        CoreError::Mirror {
            operation,
            path: path.into(),
            source,
        }
    }
}
