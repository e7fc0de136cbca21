//! Transfer job state machine.
//!
//! A job moves one source (a file or a directory tree) into one destination
//! directory. The bytes always land in a hidden staging sibling of the final
//! path first; only a verified copy is renamed into place, and a move deletes
//! its source only after that rename.
//!
//! ```text
//! Pending --start--> Copying|Moving --data-written--> Verifying
//! Verifying --checksum-ok--> Completed
//! Verifying --checksum-mismatch--> Failed
//! Copying|Moving|Verifying --io-error--> Failed
//! Pending --preflight-error--> Failed
//! ```
//!
//! Every transition publishes exactly one `ProgressEvent`.

use chrono::Utc;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use uuid::Uuid;

use crate::checksums::{ChecksumValue, StreamingHasher};
use crate::config::EngineConfig;
use crate::error::{JobError, TransferError};
use crate::fs_ops::{self, Fingerprint};
use crate::model::{TransferJob, TransferStatus};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::resolver::{self, ResolvedTransfer, SourceKind};

/// Observation points inside a running job.
///
/// Production code uses the no-op defaults; tests use them to inject faults
/// (corrupting staged data, deleting a source mid-copy, cancelling).
pub trait StageHooks: Send + Sync {
    /// Called after each chunk lands in the staging file.
    fn on_chunk_written(&self, _job: &JobHandle, _bytes_written: u64) {}

    /// Called after the `Verifying` transition, before any staged byte is re-read.
    fn before_verify(&self, _job: &JobHandle, _staging_path: &Path) {}

    /// Extra latency for the source read that follows `bytes_read` bytes.
    /// It counts against the stall window like a slow device would.
    fn read_latency(&self, _job: &JobHandle, _bytes_read: u64) -> Option<Duration> {
        None
    }
}

/// Hooks that do nothing.
pub struct NoHooks;

impl StageHooks for NoHooks {}

/// Cooperative cancellation request shared between a job and its owner.
#[derive(Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        CancelFlag { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

struct JobShared {
    record: watch::Sender<TransferJob>,
    cancel: CancelFlag,
}

/// Caller-side handle on a job owned by the engine.
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub(crate) fn new(job: TransferJob) -> Self {
        let (record, _rx) = watch::channel(job.clone());
        JobHandle {
            id: job.id,
            shared: Arc::new(JobShared {
                record,
                cancel: CancelFlag::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> TransferJob {
        self.shared.record.borrow().clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.shared.record.borrow().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Ask the job to stop. Takes effect at the next chunk boundary; a job
    /// that already finished is unaffected.
    pub fn cancel(&self) {
        if !self.is_terminal() {
            self.shared.cancel.cancel();
        }
    }

    pub(crate) fn cancel_flag(&self) -> &CancelFlag {
        &self.shared.cancel
    }

    /// Wait for the job to reach `Completed` or `Failed`.
    pub async fn wait(&self) -> TransferJob {
        let mut rx = self.shared.record.subscribe();
        let finished = rx.wait_for(|job| job.status.is_terminal()).await.map(|job| job.clone());
        finished.unwrap_or_else(|_| self.snapshot())
    }

    fn modify(&self, f: impl FnOnce(&mut TransferJob)) {
        self.shared.record.send_modify(f);
    }
}

/// Everything a job needs from the engine that spawned it.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub config: Arc<EngineConfig>,
    pub bus: ProgressBus,
    pub hooks: Arc<dyn StageHooks>,
}

/// Tracks bytes written against the total.
struct ByteProgress {
    total: u64,
    written: u64,
}

impl ByteProgress {
    fn new(total: u64) -> Self {
        ByteProgress { total, written: 0 }
    }

    /// Never reaches 100: that value means "verified and in place".
    fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let raw = (self.written as u128 * 100) / self.total as u128;
        raw.min(99) as u8
    }
}

/// Drives a single job through its states.
pub(crate) struct JobRunner {
    handle: JobHandle,
    ctx: JobContext,
}

impl JobRunner {
    pub(crate) fn new(handle: JobHandle, ctx: JobContext) -> Self {
        JobRunner { handle, ctx }
    }

    /// Resolve and validate the job's paths. No file data is touched; a
    /// missing destination directory is created here.
    pub(crate) async fn preflight(&self) -> Result<ResolvedTransfer, TransferError> {
        let job = self.handle.snapshot();
        let (source, destination, policy) = (
            job.source_path.clone(),
            job.destination_path.clone(),
            job.collision_policy,
        );
        let plan = tokio::task::spawn_blocking(move || {
            resolver::resolve_with(&source, &destination, policy)
        })
        .await
        .map_err(|e| TransferError::io(&job.source_path, io::Error::new(io::ErrorKind::Other, e.to_string())))??;

        if plan.create_destination {
            fs::create_dir_all(&plan.destination_dir)
                .await
                .map_err(|e| TransferError::inaccessible(&plan.destination_dir, e.to_string()))?;
            log::debug!("created destination {}", plan.destination_dir.display());
        }

        self.handle.modify(|job| {
            job.final_path = Some(plan.final_path.clone());
            job.bytes_total = plan.total_bytes;
        });
        Ok(plan)
    }

    /// Stage, verify and commit. On error the staged data is already gone
    /// and the source is untouched; the caller records the failure.
    pub(crate) async fn transfer(&self, plan: &ResolvedTransfer) -> Result<(), TransferError> {
        let job = self.handle.snapshot();
        self.transition(
            job.mode.active_status(),
            format!("{} {}...", job.mode.verb(), job.file_name),
        );
        log::info!(
            "{} {} -> {}",
            job.mode.verb(),
            plan.source.display(),
            plan.final_path.display()
        );

        let result = match self.stage_and_verify(plan, &job.file_name).await {
            Ok(()) => self.commit(plan, &job).await,
            Err(err) => Err(err),
        };
        if result.is_err() {
            // After a successful rename the staging path no longer exists,
            // so this only ever removes uncommitted data.
            fs_ops::remove_best_effort(&plan.staging_path, plan.is_dir()).await;
        }
        result
    }

    /// Record `err` and move to `Failed`. No-op for a job already finished.
    pub(crate) fn fail(&self, err: TransferError) {
        let job_error = JobError::from(&err);
        let message = job_error.to_string();
        self.apply_transition(TransferStatus::Failed, message, |job| {
            log::error!("job {} ({}) failed: {}", job.id, job.file_name, job_error);
            job.last_error = Some(job_error);
        });
    }

    async fn stage_and_verify(&self, plan: &ResolvedTransfer, name: &str) -> Result<(), TransferError> {
        let mut progress = ByteProgress::new(plan.total_bytes);

        let manifest = match &plan.kind {
            SourceKind::File => {
                let digest = self
                    .stream_file(&plan.source, &plan.staging_path, &mut progress)
                    .await?;
                vec![(plan.staging_path.clone(), digest)]
            }
            SourceKind::Directory { entries } => {
                fs::create_dir(&plan.staging_path)
                    .await
                    .map_err(|e| TransferError::io(&plan.staging_path, e))?;
                let mut manifest = Vec::new();
                for entry in entries {
                    let staged = plan.staging_path.join(&entry.relative_path);
                    if entry.is_dir {
                        self.check_cancelled()?;
                        fs::create_dir(&staged)
                            .await
                            .map_err(|e| TransferError::io(&staged, e))?;
                        continue;
                    }
                    let source = plan.source.join(&entry.relative_path);
                    let digest = self.stream_file(&source, &staged, &mut progress).await?;
                    if self.ctx.config.preserve_mtime {
                        fs_ops::preserve_mtime(&staged, entry.modified);
                    }
                    manifest.push((staged, digest));
                }
                manifest
            }
        };

        self.check_cancelled()?;
        self.check_source_unchanged(plan).await?;

        self.transition(
            TransferStatus::Verifying,
            format!("Verifying checksum for {}...", name),
        );
        self.ctx.hooks.before_verify(&self.handle, &plan.staging_path);

        for (path, expected) in &manifest {
            let actual = self.digest_file(path).await?;
            if actual != *expected {
                return Err(TransferError::ChecksumMismatch {
                    path: path.clone(),
                    expected: expected.to_string_with_algo(),
                    actual: actual.to_string_with_algo(),
                });
            }
        }
        log::debug!("job {}: {} file(s) verified", self.handle.id(), manifest.len());
        Ok(())
    }

    async fn commit(&self, plan: &ResolvedTransfer, job: &TransferJob) -> Result<(), TransferError> {
        self.check_cancelled()?;

        if !plan.replaces_existing && fs::symlink_metadata(&plan.final_path).await.is_ok() {
            return Err(TransferError::DestinationExists {
                path: plan.final_path.clone(),
            });
        }
        if self.ctx.config.preserve_mtime && !plan.is_dir() {
            fs_ops::preserve_mtime(&plan.staging_path, plan.source_fingerprint.modified);
        }

        // Not bounded by the stall window: abandoning a rename that may
        // still land would leave a finished file behind a failed job.
        fs::rename(&plan.staging_path, &plan.final_path)
            .await
            .map_err(|e| TransferError::io(&plan.final_path, e))?;

        if job.mode.is_move() {
            self.publish_note(format!("Removing source file {}.", job.file_name));
            let removed = if plan.is_dir() {
                fs::remove_dir_all(&plan.source).await
            } else {
                fs::remove_file(&plan.source).await
            };
            removed.map_err(|source| TransferError::SourceNotRemoved {
                path: plan.source.clone(),
                source,
            })?;
        }

        self.transition(TransferStatus::Completed, "Checksum OK. Transfer complete.");
        log::info!("job {} completed: {}", job.id, plan.final_path.display());
        Ok(())
    }

    /// Copy `source` into a new file at `staged`, hashing on the way.
    async fn stream_file(
        &self,
        source: &Path,
        staged: &Path,
        progress: &mut ByteProgress,
    ) -> Result<ChecksumValue, TransferError> {
        let mut reader = self
            .timed(File::open(source))
            .await?
            .map_err(|e| TransferError::io(source, e))?;
        let mut writer = self
            .timed(OpenOptions::new().write(true).create_new(true).open(staged))
            .await?
            .map_err(|e| TransferError::io(staged, e))?;

        let mut hasher = StreamingHasher::new(self.ctx.config.checksum);
        let mut buffer = vec![0u8; self.ctx.config.chunk_size];
        loop {
            self.check_cancelled()?;
            let latency = self.ctx.hooks.read_latency(&self.handle, progress.written);
            let n = self
                .timed(async {
                    if let Some(delay) = latency {
                        tokio::time::sleep(delay).await;
                    }
                    reader.read(&mut buffer).await
                })
                .await?
                .map_err(|e| TransferError::io(source, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            self.timed(writer.write_all(&buffer[..n]))
                .await?
                .map_err(|e| TransferError::io(staged, e))?;

            progress.written += n as u64;
            self.report_progress(progress);
            self.ctx.hooks.on_chunk_written(&self.handle, progress.written);
        }

        self.timed(writer.flush())
            .await?
            .map_err(|e| TransferError::io(staged, e))?;
        self.timed(writer.sync_all())
            .await?
            .map_err(|e| TransferError::io(staged, e))?;
        Ok(hasher.finalize())
    }

    /// Re-read a staged file and hash it.
    async fn digest_file(&self, path: &Path) -> Result<ChecksumValue, TransferError> {
        let mut file = self
            .timed(File::open(path))
            .await?
            .map_err(|e| TransferError::io(path, e))?;
        let mut hasher = StreamingHasher::new(self.ctx.config.checksum);
        let mut buffer = vec![0u8; self.ctx.config.chunk_size];
        loop {
            self.check_cancelled()?;
            let n = self
                .timed(file.read(&mut buffer))
                .await?
                .map_err(|e| TransferError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }

    /// The source must look exactly as it did at preflight, otherwise the
    /// staged copy may not be what the user has on disk any more.
    async fn check_source_unchanged(&self, plan: &ResolvedTransfer) -> Result<(), TransferError> {
        let plan = plan.clone();
        let changed = tokio::task::spawn_blocking(move || -> Option<PathBuf> {
            match &plan.kind {
                SourceKind::File => match Fingerprint::read(&plan.source) {
                    Ok(now) if now == plan.source_fingerprint => None,
                    _ => Some(plan.source.clone()),
                },
                SourceKind::Directory { entries } => {
                    if !plan.source.is_dir() {
                        return Some(plan.source.clone());
                    }
                    entries.iter().filter(|e| !e.is_dir).find_map(|entry| {
                        let path = plan.source.join(&entry.relative_path);
                        match Fingerprint::read(&path) {
                            Ok(now) if now.len == entry.len && now.modified == entry.modified => None,
                            _ => Some(path),
                        }
                    })
                }
            }
        })
        .await
        .unwrap_or_else(|_| Some(self.handle.snapshot().source_path));

        match changed {
            Some(path) => Err(TransferError::SourceChanged { path }),
            None => Ok(()),
        }
    }

    fn check_cancelled(&self) -> Result<(), TransferError> {
        if self.handle.cancel_flag().is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Bound one I/O operation by the stall window.
    pub(crate) async fn timed<F: Future>(&self, op: F) -> Result<F::Output, TransferError> {
        let window = self.ctx.config.stall_timeout;
        tokio::time::timeout(window, op).await.map_err(|_| {
            log::warn!("job {} stalled for {:?}", self.handle.id(), window);
            TransferError::Stalled { window }
        })
    }

    fn report_progress(&self, progress: &ByteProgress) {
        let percent = progress.percent();
        let written = progress.written;
        let mut event = None;
        self.handle.modify(|job| {
            job.bytes_written = written;
            if percent > job.progress_percent {
                job.progress_percent = percent;
                event = Some(ProgressEvent::new(job, format!("Transferring... {}%", percent), None));
            }
        });
        if let Some(event) = event {
            self.ctx.bus.publish(event);
        }
    }

    /// Informational event without a state change.
    fn publish_note(&self, message: String) {
        let event = ProgressEvent::new(&self.handle.snapshot(), message, None);
        self.ctx.bus.publish(event);
    }

    fn transition(&self, next: TransferStatus, message: impl Into<String>) {
        self.apply_transition(next, message.into(), |_| {});
    }

    fn apply_transition(
        &self,
        next: TransferStatus,
        message: String,
        extra: impl FnOnce(&mut TransferJob),
    ) {
        let mut event = None;
        self.handle.modify(|job| {
            if !job.status.can_transition_to(next) {
                log::debug!(
                    "job {}: ignoring transition {} -> {}",
                    job.id,
                    job.status,
                    next
                );
                return;
            }
            log::debug!("job {}: {} -> {}", job.id, job.status, next);
            job.status = next;
            match next {
                TransferStatus::Completed => {
                    job.progress_percent = 100;
                    job.finished_at = Some(Utc::now());
                }
                TransferStatus::Failed => job.finished_at = Some(Utc::now()),
                _ => {}
            }
            extra(job);
            event = Some(ProgressEvent::new(job, message, Some(next)));
        });
        if let Some(event) = event {
            self.ctx.bus.publish(event);
        }
    }
}
