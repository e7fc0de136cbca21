//! Shared helpers for unit tests.

use std::path::Path;
use std::time::Duration;

use crate::job::{JobHandle, StageHooks};
use crate::resolver::is_staging_name;

type ChunkFn = Box<dyn Fn(&JobHandle, u64) + Send + Sync>;
type VerifyFn = Box<dyn Fn(&JobHandle, &Path) + Send + Sync>;

/// Hooks built from closures.
#[derive(Default)]
pub struct FnHooks {
    on_chunk: Option<ChunkFn>,
    before_verify: Option<VerifyFn>,
    /// (bytes read before the device slows down, per-read delay)
    slow_reads: Option<(u64, Duration)>,
}

impl FnHooks {
    pub fn on_chunk(mut self, f: impl Fn(&JobHandle, u64) + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    pub fn on_verify(mut self, f: impl Fn(&JobHandle, &Path) + Send + Sync + 'static) -> Self {
        self.before_verify = Some(Box::new(f));
        self
    }

    pub fn slow_reads_after(mut self, bytes: u64, delay: Duration) -> Self {
        self.slow_reads = Some((bytes, delay));
        self
    }
}

impl StageHooks for FnHooks {
    fn on_chunk_written(&self, job: &JobHandle, bytes_written: u64) {
        if let Some(f) = &self.on_chunk {
            f(job, bytes_written);
        }
    }

    fn before_verify(&self, job: &JobHandle, staging_path: &Path) {
        if let Some(f) = &self.before_verify {
            f(job, staging_path);
        }
    }

    fn read_latency(&self, _job: &JobHandle, bytes_read: u64) -> Option<Duration> {
        self.slow_reads
            .filter(|(after, _)| bytes_read >= *after)
            .map(|(_, delay)| delay)
    }
}

/// Write `len` bytes of a non-repeating-per-chunk pattern.
pub fn write_pattern(path: &Path, len: usize) {
    let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(path, data).expect("Failed to write test file");
}

/// Names of staging entries left in `dir`.
pub fn staging_leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("Failed to read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| is_staging_name(name))
        .collect()
}
