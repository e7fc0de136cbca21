//! Transfer engine: accepts batches, schedules jobs, answers queries.
//!
//! Each job runs as its own tokio task. Before doing I/O a job takes the
//! exclusive lock on its destination name family, then one of the slots of
//! its destination volume; both are held until the job is terminal. A job
//! never waits for a lock while holding a slot.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, TransferError};
use crate::fs_ops::{self, VolumeKey};
use crate::job::{CancelFlag, JobContext, JobHandle, JobRunner, NoHooks, StageHooks};
use crate::model::{CollisionPolicy, Destination, Mode, TransferJob, TransferStatus};
use crate::progress::{ProgressBus, ProgressEvent, Subscription};
use crate::resolver;

/// Exclusive locks keyed by destination name family.
///
/// Entries are weak so a path nobody is waiting on costs nothing.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    async fn lock(&self, path: PathBuf) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(&path).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(path, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }
}

/// Per-volume I/O slots.
struct VolumeSlots {
    per_volume: usize,
    semaphores: Mutex<HashMap<VolumeKey, Arc<Semaphore>>>,
}

impl VolumeSlots {
    fn new(per_volume: usize) -> Self {
        VolumeSlots {
            per_volume,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, volume: VolumeKey) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut semaphores = self.semaphores.lock();
            Arc::clone(
                semaphores
                    .entry(volume)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.per_volume))),
            )
        };
        semaphore.acquire_owned().await.ok()
    }
}

struct EngineInner {
    config: Arc<EngineConfig>,
    bus: ProgressBus,
    hooks: Arc<dyn StageHooks>,
    /// Submission order; bounded by `history_limit` finished jobs
    jobs: Mutex<VecDeque<JobHandle>>,
    path_locks: PathLocks,
    slots: VolumeSlots,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl EngineInner {
    fn job_context(&self) -> JobContext {
        JobContext {
            config: Arc::clone(&self.config),
            bus: self.bus.clone(),
            hooks: Arc::clone(&self.hooks),
        }
    }

    fn remember(&self, handle: JobHandle) {
        let mut jobs = self.jobs.lock();
        jobs.push_back(handle);
        while jobs.len() > self.config.history_limit {
            match jobs.iter().position(|j| j.is_terminal()) {
                Some(oldest_finished) => {
                    jobs.remove(oldest_finished);
                }
                None => break,
            }
        }
    }

    fn find(&self, id: Uuid) -> Option<JobHandle> {
        self.jobs.lock().iter().find(|j| j.id() == id).cloned()
    }
}

/// Runs transfer jobs on the current tokio runtime.
///
/// Cheap to clone; clones share the same jobs, locks and bus.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_hooks(config, Arc::new(NoHooks))
    }

    /// Engine whose jobs report to `hooks` at each stage.
    pub fn with_hooks(config: EngineConfig, hooks: Arc<dyn StageHooks>) -> Result<Self, EngineError> {
        config.validate()?;
        log::debug!("starting transfer engine with {:?}", config);
        Ok(TransferEngine {
            inner: Arc::new(EngineInner {
                bus: ProgressBus::new(config.bus_capacity),
                slots: VolumeSlots::new(config.max_concurrent_per_volume),
                config: Arc::new(config),
                hooks,
                jobs: Mutex::new(VecDeque::new()),
                path_locks: PathLocks::default(),
                tasks: Mutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Events published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.inner.bus.subscribe()
    }

    /// One job per source, all into `destination`, with the configured
    /// collision policy.
    pub fn submit<P: AsRef<Path>>(
        &self,
        sources: &[P],
        destination: &Destination,
        mode: Mode,
    ) -> Result<Vec<JobHandle>, EngineError> {
        self.submit_with(sources, destination, mode, self.inner.config.collision_policy)
    }

    pub fn submit_with<P: AsRef<Path>>(
        &self,
        sources: &[P],
        destination: &Destination,
        mode: Mode,
        policy: CollisionPolicy,
    ) -> Result<Vec<JobHandle>, EngineError> {
        log::info!(
            "{} {} item(s) to \"{}\" ({}, on conflict: {})",
            mode.verb(),
            sources.len(),
            destination.name,
            destination.path.display(),
            policy
        );
        let jobs = sources
            .iter()
            .map(|source| {
                TransferJob::new(
                    source.as_ref().to_path_buf(),
                    destination.id,
                    destination.path.clone(),
                    mode,
                    policy,
                )
            })
            .collect();
        self.spawn_all(jobs)
    }

    /// Run a failed job again as a new job with a new id.
    pub fn retry(&self, id: Uuid) -> Result<JobHandle, EngineError> {
        let previous = self.inner.find(id).ok_or(EngineError::UnknownJob(id))?.snapshot();
        if previous.status != TransferStatus::Failed {
            return Err(EngineError::NotRetryable {
                id,
                status: previous.status,
            });
        }
        log::info!("retrying {} (was job {})", previous.file_name, id);
        let job = TransferJob::new(
            previous.source_path,
            previous.destination_id,
            previous.destination_path,
            previous.mode,
            previous.collision_policy,
        );
        let mut spawned = self.spawn_all(vec![job])?;
        spawned.pop().ok_or(EngineError::UnknownJob(id))
    }

    fn spawn_all(&self, jobs: Vec<TransferJob>) -> Result<Vec<JobHandle>, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        // Checked under the task lock so shutdown sees every task spawned
        // before it flipped the flag.
        let mut tasks = self.inner.tasks.lock();
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        tasks.retain(|task| !task.is_finished());

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let queued = ProgressEvent::new(&job, format!("Queued {}", job.file_name), Some(TransferStatus::Pending));
            let handle = JobHandle::new(job);
            self.inner.remember(handle.clone());
            self.inner.bus.publish(queued);
            tasks.push(runtime.spawn(drive(Arc::clone(&self.inner), handle.clone())));
            handles.push(handle);
        }
        Ok(handles)
    }

    pub fn cancel(&self, id: Uuid) -> Result<(), EngineError> {
        let handle = self.inner.find(id).ok_or(EngineError::UnknownJob(id))?;
        log::info!("cancel requested for job {}", id);
        handle.cancel();
        Ok(())
    }

    pub fn job(&self, id: Uuid) -> Option<JobHandle> {
        self.inner.find(id)
    }

    /// Snapshots of active and recently finished jobs, oldest first.
    pub fn jobs(&self) -> Vec<TransferJob> {
        self.inner.jobs.lock().iter().map(JobHandle::snapshot).collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.jobs.lock().iter().filter(|j| !j.is_terminal()).count()
    }

    /// Cancel every unfinished job and wait until each has cleaned up.
    /// Later submissions are refused.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut tasks = self.inner.tasks.lock();
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            std::mem::take(&mut *tasks)
        };
        let live: Vec<JobHandle> = self
            .inner
            .jobs
            .lock()
            .iter()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        log::info!("shutting down; cancelling {} unfinished job(s)", live.len());
        for job in &live {
            job.cancel();
        }
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("transfer task ended abnormally: {}", e);
            }
        }
        log::debug!("shutdown complete");
    }
}

/// Key of the destination lock.
///
/// Covers the requested name and every collision rename of it, so the
/// final name is chosen and written under one lock.
fn lock_key(job: &TransferJob) -> PathBuf {
    resolver::name_family(&job.destination_path.join(&job.file_name))
}

/// Wait for `acquire` unless the job is cancelled first.
async fn unless_cancelled<T>(
    cancel: &CancelFlag,
    acquire: impl std::future::Future<Output = Option<T>>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        acquired = acquire => acquired,
    }
}

async fn drive(inner: Arc<EngineInner>, handle: JobHandle) {
    let runner = JobRunner::new(handle.clone(), inner.job_context());
    let job = handle.snapshot();
    let cancel = handle.cancel_flag().clone();

    let path_lock = async { Some(inner.path_locks.lock(lock_key(&job)).await) };
    let Some(_path_guard) = unless_cancelled(&cancel, path_lock).await else {
        runner.fail(TransferError::Cancelled);
        return;
    };

    let destination = job.destination_path.clone();
    let volume = tokio::task::spawn_blocking(move || fs_ops::volume_key(&destination))
        .await
        .unwrap_or_else(|_| VolumeKey::Prefix(PathBuf::new()));
    let Some(_slot) = unless_cancelled(&cancel, inner.slots.acquire(volume)).await else {
        runner.fail(TransferError::Cancelled);
        return;
    };

    let plan = match runner.preflight().await {
        Ok(plan) => plan,
        Err(err) => {
            runner.fail(err);
            return;
        }
    };

    if let Err(err) = runner.transfer(&plan).await {
        runner.fail(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{staging_leftovers, write_pattern, FnHooks};
    use std::time::Duration;

    fn dirs() -> (tempfile::TempDir, PathBuf, Destination) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        std::fs::create_dir(&src).expect("Failed to create src dir");
        std::fs::create_dir(&dst).expect("Failed to create dst dir");
        (temp_dir, src, Destination::new("Archive", dst))
    }

    fn small_chunks() -> EngineConfig {
        EngineConfig {
            chunk_size: 1024,
            ..EngineConfig::default()
        }
    }

    /// Hooks that slow each chunk down so jobs overlap in time.
    fn sluggish() -> Arc<dyn StageHooks> {
        Arc::new(FnHooks::default().on_chunk(|_, _| std::thread::sleep(Duration::from_millis(2))))
    }

    async fn wait_all(handles: &[JobHandle]) -> Vec<TransferJob> {
        let mut done = Vec::new();
        for handle in handles {
            done.push(handle.wait().await);
        }
        done
    }

    /// (first `Copying`/`Moving` index, terminal index) per job in `events`.
    fn active_spans(events: &[ProgressEvent], ids: &[Uuid]) -> Vec<(usize, usize)> {
        ids.iter()
            .map(|id| {
                let start = events
                    .iter()
                    .position(|e| {
                        e.job_id == *id
                            && matches!(e.status, Some(TransferStatus::Copying | TransferStatus::Moving))
                    })
                    .expect("job never started");
                let end = events
                    .iter()
                    .position(|e| e.job_id == *id && e.is_terminal())
                    .expect("job never finished");
                (start, end)
            })
            .collect()
    }

    fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
        a.0 < b.1 && b.0 < a.1
    }

    #[tokio::test]
    async fn test_submit_batch_completes_every_job() {
        let (_tmp, src, dest) = dirs();
        let sources: Vec<PathBuf> = ["a.txt", "b.txt", "c.txt"]
            .iter()
            .map(|name| {
                let path = src.join(name);
                write_pattern(&path, 3000);
                path
            })
            .collect();

        let engine = TransferEngine::new(small_chunks()).unwrap();
        let events = engine.subscribe();
        let handles = engine.submit(&sources, &dest, Mode::Copy).unwrap();
        assert_eq!(handles.len(), 3);

        for job in wait_all(&handles).await {
            assert_eq!(job.status, TransferStatus::Completed, "{:?}", job.last_error);
            assert_eq!(job.destination_id, dest.id);
            assert!(dest.path.join(&job.file_name).exists());
        }
        assert_eq!(engine.jobs().len(), 3);
        assert_eq!(engine.active_count(), 0);

        let events = events.drain();
        for handle in &handles {
            let statuses: Vec<TransferStatus> = events
                .iter()
                .filter(|e| e.job_id == handle.id())
                .filter_map(|e| e.status)
                .collect();
            assert_eq!(
                statuses,
                vec![
                    TransferStatus::Pending,
                    TransferStatus::Copying,
                    TransferStatus::Verifying,
                    TransferStatus::Completed
                ]
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_final_path_never_runs_concurrently() {
        let (tmp, _src, dest) = dirs();
        let left = tmp.path().join("left");
        let right = tmp.path().join("right");
        std::fs::create_dir_all(&left).unwrap();
        std::fs::create_dir_all(&right).unwrap();
        write_pattern(&left.join("report.csv"), 20 * 1024);
        write_pattern(&right.join("report.csv"), 30 * 1024);

        let config = EngineConfig {
            max_concurrent_per_volume: 4,
            ..small_chunks()
        };
        let engine = TransferEngine::with_hooks(config, sluggish()).unwrap();
        let events = engine.subscribe();

        let a = engine
            .submit_with(&[left.join("report.csv")], &dest, Mode::Copy, CollisionPolicy::Overwrite)
            .unwrap();
        let b = engine
            .submit_with(&[right.join("report.csv")], &dest, Mode::Copy, CollisionPolicy::Overwrite)
            .unwrap();
        let finished = wait_all(&[a[0].clone(), b[0].clone()]).await;
        assert!(finished.iter().all(|j| j.status == TransferStatus::Completed));

        let spans = active_spans(&events.drain(), &[a[0].id(), b[0].id()]);
        assert!(!overlaps(spans[0], spans[1]), "{spans:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_volume_slots_bound_concurrency() {
        let (_tmp, src, dest) = dirs();
        let sources: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = src.join(format!("part{i}.bin"));
                write_pattern(&path, 16 * 1024);
                path
            })
            .collect();

        let config = EngineConfig {
            max_concurrent_per_volume: 1,
            ..small_chunks()
        };
        let engine = TransferEngine::with_hooks(config, sluggish()).unwrap();
        let events = engine.subscribe();
        let handles = engine.submit(&sources, &dest, Mode::Copy).unwrap();
        wait_all(&handles).await;

        let ids: Vec<Uuid> = handles.iter().map(JobHandle::id).collect();
        let spans = active_spans(&events.drain(), &ids);
        for i in 0..spans.len() {
            for j in i + 1..spans.len() {
                assert!(!overlaps(spans[i], spans[j]), "{spans:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_resubmitting_a_completed_move_fails_preflight() {
        let (_tmp, src, dest) = dirs();
        let source = src.join("once.txt");
        std::fs::write(&source, b"only once").unwrap();

        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        let first = engine.submit(&[&source], &dest, Mode::Move).unwrap();
        assert_eq!(first[0].wait().await.status, TransferStatus::Completed);

        let again = engine.submit(&[&source], &dest, Mode::Move).unwrap();
        let job = again[0].wait().await;
        assert_eq!(job.status, TransferStatus::Failed);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::SourceUnreadable);
        assert_eq!(std::fs::read(dest.path.join("once.txt")).unwrap(), b"only once");
    }

    #[tokio::test]
    async fn test_retry_runs_a_fresh_job() {
        let (_tmp, src, dest) = dirs();
        let source = src.join("late.txt");

        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        let failed = engine.submit(&[&source], &dest, Mode::Copy).unwrap()[0].wait().await;
        assert_eq!(failed.status, TransferStatus::Failed);

        std::fs::write(&source, b"here now").unwrap();
        let retried = engine.retry(failed.id).unwrap();
        assert_ne!(retried.id(), failed.id);
        assert_eq!(retried.snapshot().progress_percent, 0);
        let done = retried.wait().await;
        assert_eq!(done.status, TransferStatus::Completed);

        assert!(matches!(
            engine.retry(done.id),
            Err(EngineError::NotRetryable { status: TransferStatus::Completed, .. })
        ));
        assert!(matches!(engine.retry(Uuid::new_v4()), Err(EngineError::UnknownJob(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_waiting_for_a_slot() {
        let (_tmp, src, dest) = dirs();
        let big = src.join("big.bin");
        let small = src.join("small.bin");
        write_pattern(&big, 64 * 1024);
        write_pattern(&small, 10);

        let config = EngineConfig {
            max_concurrent_per_volume: 1,
            ..small_chunks()
        };
        let engine = TransferEngine::with_hooks(config, sluggish()).unwrap();
        let events = engine.subscribe();
        let first = engine.submit(&[&big], &dest, Mode::Copy).unwrap();
        while first[0].status() == TransferStatus::Pending {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let second = engine.submit(&[&small], &dest, Mode::Copy).unwrap();

        engine.cancel(second[0].id()).unwrap();
        let cancelled = second[0].wait().await;
        assert_eq!(cancelled.status, TransferStatus::Failed);
        assert_eq!(cancelled.last_error.unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(first[0].wait().await.status, TransferStatus::Completed);

        let second_statuses: Vec<TransferStatus> = events
            .drain()
            .iter()
            .filter(|e| e.job_id == second[0].id())
            .filter_map(|e| e.status)
            .collect();
        assert_eq!(second_statuses, vec![TransferStatus::Pending, TransferStatus::Failed]);
        assert!(small.exists());
        assert!(!dest.path.join("small.bin").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_cancels_and_cleans_up() {
        let (_tmp, src, dest) = dirs();
        let source = src.join("huge.bin");
        write_pattern(&source, 256 * 1024);
        let before = std::fs::read(&source).unwrap();

        let engine = TransferEngine::with_hooks(small_chunks(), sluggish()).unwrap();
        let handles = engine.submit(&[&source], &dest, Mode::Move).unwrap();
        while handles[0].status() == TransferStatus::Pending {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        engine.shutdown().await;

        let job = handles[0].snapshot();
        assert_eq!(job.status, TransferStatus::Failed);
        assert_eq!(job.last_error.unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(std::fs::read(&source).unwrap(), before);
        assert!(staging_leftovers(&dest.path).is_empty());
        assert!(!dest.path.join("huge.bin").exists());

        assert!(matches!(
            engine.submit(&[&source], &dest, Mode::Copy),
            Err(EngineError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_history_keeps_only_recent_finished_jobs() {
        let (_tmp, src, dest) = dirs();
        let config = EngineConfig {
            history_limit: 2,
            ..EngineConfig::default()
        };
        let engine = TransferEngine::new(config).unwrap();

        let mut last = None;
        for i in 0..4 {
            let path = src.join(format!("{i}.txt"));
            std::fs::write(&path, b"x").unwrap();
            let handle = engine.submit(&[&path], &dest, Mode::Copy).unwrap().remove(0);
            handle.wait().await;
            last = Some(handle.id());
        }

        let jobs = engine.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].id, last.unwrap());
        assert!(engine.job(last.unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_rename_policy_keeps_both_files() {
        let (_tmp, src, dest) = dirs();
        let source = src.join("notes.txt");
        std::fs::write(&source, b"second").unwrap();
        std::fs::write(dest.path.join("notes.txt"), b"first").unwrap();

        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        let job = engine
            .submit_with(&[&source], &dest, Mode::Copy, CollisionPolicy::Rename)
            .unwrap()[0]
            .wait()
            .await;

        assert_eq!(job.status, TransferStatus::Completed);
        assert_eq!(job.final_path, Some(dest.path.join("notes (1).txt")));
        assert_eq!(std::fs::read(dest.path.join("notes.txt")).unwrap(), b"first");
        assert_eq!(std::fs::read(dest.path.join("notes (1).txt")).unwrap(), b"second");
    }

    /// `x.txt` already exists; one source is `x.txt`, the other is literally
    /// `x (1).txt`, the first rename candidate of the former.
    async fn rename_next_to_a_literal_variant(slots: usize) {
        let (tmp, _src, dest) = dirs();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(first.join("x.txt"), vec![b'a'; 8 * 1024]).unwrap();
        std::fs::write(second.join("x (1).txt"), vec![b'b'; 8 * 1024]).unwrap();
        std::fs::write(dest.path.join("x.txt"), b"old").unwrap();

        let config = EngineConfig {
            max_concurrent_per_volume: slots,
            ..small_chunks()
        };
        let engine = TransferEngine::with_hooks(config, sluggish()).unwrap();
        let handles = engine
            .submit_with(
                &[first.join("x.txt"), second.join("x (1).txt")],
                &dest,
                Mode::Copy,
                CollisionPolicy::Rename,
            )
            .unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(10), wait_all(&handles))
            .await
            .expect("jobs never finished");

        for job in &finished {
            assert_eq!(job.status, TransferStatus::Completed, "{:?}", job.last_error);
        }
        let a = finished[0].final_path.clone().unwrap();
        let b = finished[1].final_path.clone().unwrap();
        assert_ne!(a, b);
        assert_ne!(a, dest.path.join("x.txt"));
        assert_eq!(std::fs::read(&a).unwrap(), vec![b'a'; 8 * 1024]);
        assert_eq!(std::fs::read(&b).unwrap(), vec![b'b'; 8 * 1024]);
        assert_eq!(std::fs::read(dest.path.join("x.txt")).unwrap(), b"old");
        assert!(staging_leftovers(&dest.path).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rename_beside_literal_variant_with_one_slot() {
        rename_next_to_a_literal_variant(1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rename_beside_literal_variant_with_many_slots() {
        rename_next_to_a_literal_variant(4).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_renamed_variants_share_one_lock() {
        let (tmp, _src, dest) = dirs();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        write_pattern(&first.join("x.txt"), 16 * 1024);
        write_pattern(&second.join("x (1).txt"), 16 * 1024);

        let config = EngineConfig {
            max_concurrent_per_volume: 4,
            ..small_chunks()
        };
        let engine = TransferEngine::with_hooks(config, sluggish()).unwrap();
        let events = engine.subscribe();
        let handles = engine
            .submit_with(
                &[first.join("x.txt"), second.join("x (1).txt")],
                &dest,
                Mode::Copy,
                CollisionPolicy::Rename,
            )
            .unwrap();
        wait_all(&handles).await;

        let ids: Vec<Uuid> = handles.iter().map(JobHandle::id).collect();
        let spans = active_spans(&events.drain(), &ids);
        assert!(!overlaps(spans[0], spans[1]), "{spans:?}");
    }

    #[tokio::test]
    async fn test_unknown_job_queries() {
        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(engine.cancel(id), Err(EngineError::UnknownJob(j)) if j == id));
        assert!(engine.job(id).is_none());
        assert!(engine.jobs().is_empty());
    }

    #[test]
    fn test_submit_needs_a_runtime() {
        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        let dest = Destination::new("Nowhere", "/tmp");
        assert!(matches!(
            engine.submit(&["/tmp/a"], &dest, Mode::Copy),
            Err(EngineError::NoRuntime)
        ));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = EngineConfig {
            bus_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(TransferEngine::new(config), Err(EngineError::InvalidConfig(_))));
    }
}
