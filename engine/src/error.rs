//! Error types for the transfer engine.
//!
//! Two layers of errors exist:
//! - `TransferError` describes why a single job failed. Every variant maps to
//!   a stable `ErrorKind` whose code ends up in the job's `last_error`.
//! - `EngineError` describes requests the engine itself refuses (submitting
//!   after shutdown, retrying a job that did not fail, bad configuration).
//!   These never concern a particular file.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::model::TransferStatus;

/// Stable classification of a job failure.
///
/// The first four kinds are preflight errors: they are detected before any
/// byte is written and never leave anything behind to clean up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPath,
    SourceUnreadable,
    DestinationInaccessible,
    DestinationExists,
    IoError,
    ChecksumMismatch,
    Cancelled,
    Stalled,
}

impl ErrorKind {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath => "invalid_path",
            Self::SourceUnreadable => "source_unreadable",
            Self::DestinationInaccessible => "destination_inaccessible",
            Self::DestinationExists => "destination_exists",
            Self::IoError => "io_error",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::Cancelled => "cancelled",
            Self::Stalled => "stalled",
        }
    }

    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath
                | Self::SourceUnreadable
                | Self::DestinationInaccessible
                | Self::DestinationExists
        )
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a transfer job failed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid path '{}': {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("source '{}' is not readable: {reason}", .path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("destination '{}' is inaccessible: {reason}", .path.display())]
    DestinationInaccessible { path: PathBuf, reason: String },

    #[error("destination '{}' already exists", .path.display())]
    DestinationExists { path: PathBuf },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("source '{}' changed during transfer", .path.display())]
    SourceChanged { path: PathBuf },

    #[error("transferred, but source '{}' could not be removed: {source}", .path.display())]
    SourceNotRemoved { path: PathBuf, source: io::Error },

    #[error("checksum mismatch for '{}': expected {expected}, found {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("no I/O progress for {:.1}s", .window.as_secs_f64())]
    Stalled { window: Duration },
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            Self::DestinationInaccessible { .. } => ErrorKind::DestinationInaccessible,
            Self::DestinationExists { .. } => ErrorKind::DestinationExists,
            Self::Io { .. } | Self::SourceChanged { .. } | Self::SourceNotRemoved { .. } => {
                ErrorKind::IoError
            }
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Stalled { .. } => ErrorKind::Stalled,
        }
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unreadable(path: &Path, reason: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inaccessible(path: &Path, reason: impl Into<String>) -> Self {
        Self::DestinationInaccessible {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Serializable failure record stored on a job (`last_error`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<&TransferError> for JobError {
    fn from(err: &TransferError) -> Self {
        JobError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Requests the engine refuses outright.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is shutting down; no new transfers are accepted")]
    ShuttingDown,

    #[error("no tokio runtime is available to run transfers")]
    NoRuntime,

    #[error("no job with id {0}")]
    UnknownJob(Uuid),

    #[error("job {id} is {status} and cannot be retried")]
    NotRetryable { id: Uuid, status: TransferStatus },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}
