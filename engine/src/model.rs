//! Core data model for transfer jobs.
//!
//! This module defines the records shared between the engine and its callers:
//! - Destination: a named target directory, owned by the caller's config store
//! - TransferJob: one source path headed for one destination
//! - Mode, TransferStatus, CollisionPolicy: enums controlling behavior

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::JobError;

/// A named drop target.
///
/// The engine only ever reads `path`; `id` is the key jobs refer back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
}

impl Destination {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Destination {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
        }
    }
}

/// The operation mode for a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Copy; source remains unchanged
    #[default]
    Copy,
    /// Move; source deleted only after the verified copy is in place
    Move,
}

impl Mode {
    pub fn from_move_flag(move_files: bool) -> Self {
        if move_files {
            Mode::Move
        } else {
            Mode::Copy
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Mode::Move)
    }

    /// Status a job enters when its bytes start flowing.
    pub fn active_status(&self) -> TransferStatus {
        match self {
            Mode::Copy => TransferStatus::Copying,
            Mode::Move => TransferStatus::Moving,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Mode::Copy => "Copying",
            Mode::Move => "Moving",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Copy => write!(f, "copy"),
            Mode::Move => write!(f, "move"),
        }
    }
}

/// Lifecycle of a single job.
///
/// ```text
/// Pending --start--> Copying|Moving --data-written--> Verifying
/// Verifying --checksum-ok--> Completed
/// any non-terminal --error--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Copying,
    Moving,
    Verifying,
    Completed,
    Failed,
}

impl TransferStatus {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// Whether `next` is an edge of the job state graph.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Copying | Moving | Failed)
                | (Copying | Moving, Verifying | Failed)
                | (Verifying, Completed | Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Copying => "copying",
            TransferStatus::Moving => "moving",
            TransferStatus::Verifying => "verifying",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What to do when the final destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Refuse with `DestinationExists`
    #[default]
    Fail,
    /// Replace an existing regular file through the final atomic rename
    Overwrite,
    /// Pick the first free `name (N).ext`
    Rename,
}

impl CollisionPolicy {
    /// Parse policy from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fail" => Some(Self::Fail),
            "overwrite" => Some(Self::Overwrite),
            "rename" => Some(Self::Rename),
            _ => None,
        }
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionPolicy::Fail => write!(f, "fail"),
            CollisionPolicy::Overwrite => write!(f, "overwrite"),
            CollisionPolicy::Rename => write!(f, "rename"),
        }
    }
}

/// Snapshot of a transfer job.
///
/// The engine owns the live record; callers only ever see clones of it.
/// Once `status` is terminal the record never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferJob {
    pub id: Uuid,
    pub source_path: PathBuf,
    /// Display name derived from the source's base name
    pub file_name: String,
    pub destination_id: Uuid,
    pub destination_path: PathBuf,
    /// Resolved final path, known once preflight succeeds
    pub final_path: Option<PathBuf>,
    pub mode: Mode,
    pub collision_policy: CollisionPolicy,
    pub status: TransferStatus,
    /// 0..=99 while in flight; 100 only once verified and in place
    pub progress_percent: u8,
    pub bytes_total: u64,
    pub bytes_written: u64,
    pub last_error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferJob {
    pub(crate) fn new(
        source_path: PathBuf,
        destination_id: Uuid,
        destination_path: PathBuf,
        mode: Mode,
        collision_policy: CollisionPolicy,
    ) -> Self {
        TransferJob {
            id: Uuid::new_v4(),
            file_name: display_name(&source_path),
            source_path,
            destination_id,
            destination_path,
            final_path: None,
            mode,
            collision_policy,
            status: TransferStatus::Pending,
            progress_percent: 0,
            bytes_total: 0,
            bytes_written: 0,
            last_error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn move_files(&self) -> bool {
        self.mode.is_move()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
