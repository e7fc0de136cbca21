//! # SafeMove Engine - Verified File Transfer Library
//!
//! A headless engine that copies or moves files and directory trees into a
//! destination directory without ever exposing a partial result.
//! Designed as the foundation for multiple front ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! Every transfer is a job with its own state machine:
//! - Bytes stream into a hidden staging file next to the final name
//! - The staged copy is re-read and its checksum compared to the source's
//! - Only a verified copy is renamed into place; a move deletes its source last
//! - Any failure removes the staging file and leaves the source untouched
//!
//! The engine limits concurrent I/O per destination volume, never lets two
//! jobs write the same destination path at once, and reports progress on a
//! non-blocking event bus.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{Destination, EngineConfig, Mode, TransferEngine, TransferStatus};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TransferEngine::new(EngineConfig::default())?;
//! let events = engine.subscribe();
//! let nas = Destination::new("NAS", "/mnt/nas/photos");
//!
//! let jobs = engine.submit(&["/home/me/IMG_0001.jpg"], &nas, Mode::Move)?;
//! for job in &jobs {
//!     let finished = job.wait().await;
//!     if finished.status == TransferStatus::Failed {
//!         eprintln!("{}: {:?}", finished.file_name, finished.last_error);
//!     }
//! }
//!
//! for event in events.drain() {
//!     println!("{} {}%: {}", event.file_name, event.progress_percent, event.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core records (TransferJob, Destination, enums)
//! - **error**: Error taxonomy and stable error codes
//! - **resolver**: Preflight path validation and naming
//! - **job**: Per-job state machine
//! - **engine**: Scheduling, locking, queries and shutdown
//! - **progress**: Progress events and the bus
//! - **aggregate**: Batch progress for display
//! - **journal**: User-facing transaction log
//! - **checksums**: Streaming content digests
//! - **fs_ops**: Low-level filesystem operations
//! - **config**: Engine tunables

pub mod aggregate;
pub mod checksums;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod journal;
pub mod model;
pub mod progress;
pub mod resolver;

#[cfg(test)]
mod testing;

// Re-export main types
pub use aggregate::{BatchProgress, JobView, ProgressBoard, SUMMARY_THRESHOLD};
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::EngineConfig;
pub use engine::TransferEngine;
pub use error::{EngineError, ErrorKind, JobError, TransferError};
pub use job::{JobHandle, NoHooks, StageHooks};
pub use journal::{LogEntry, LogLevel, TransactionLog};
pub use model::{CollisionPolicy, Destination, Mode, TransferJob, TransferStatus};
pub use progress::{ProgressBus, ProgressEvent, Subscription};
pub use resolver::{resolve, resolve_with, ResolvedTransfer};
