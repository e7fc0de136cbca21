//! Batch progress for display.
//!
//! A front end showing many jobs at once collapses them into a single bar
//! once more than `SUMMARY_THRESHOLD` are active. `ProgressBoard` folds the
//! event stream into per-job views so a subscriber can do that without
//! querying the engine.

use std::collections::HashMap;
use uuid::Uuid;

use crate::model::{TransferJob, TransferStatus};
use crate::progress::ProgressEvent;

/// Active-job count above which a single summary bar replaces per-job rows.
pub const SUMMARY_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    pub active: usize,
    /// Mean progress of active jobs, 0.0 when none are active
    pub aggregate_percent: f64,
    pub show_summary: bool,
}

impl BatchProgress {
    fn from_percents(percents: impl IntoIterator<Item = u8>) -> Self {
        let (count, sum) = percents
            .into_iter()
            .fold((0usize, 0u64), |(n, s), p| (n + 1, s + p as u64));
        BatchProgress {
            active: count,
            aggregate_percent: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            show_summary: count > SUMMARY_THRESHOLD,
        }
    }

    /// Aggregate over job snapshots; terminal jobs are ignored.
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a TransferJob>) -> Self {
        Self::from_percents(
            jobs.into_iter()
                .filter(|j| !j.is_terminal())
                .map(|j| j.progress_percent),
        )
    }

    pub fn rounded_percent(&self) -> u8 {
        self.aggregate_percent.round().clamp(0.0, 100.0) as u8
    }
}

/// What a subscriber knows about one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub file_name: String,
    pub status: TransferStatus,
    pub progress_percent: u8,
    pub last_message: String,
}

/// Per-job state reconstructed from progress events.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    jobs: HashMap<Uuid, JobView>,
    order: Vec<Uuid>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        if !self.jobs.contains_key(&event.job_id) {
            self.order.push(event.job_id);
        }
        let view = self.jobs.entry(event.job_id).or_insert_with(|| JobView {
            file_name: event.file_name.clone(),
            status: TransferStatus::Pending,
            progress_percent: 0,
            last_message: String::new(),
        });
        if view.status.is_terminal() {
            return;
        }
        if let Some(status) = event.status {
            view.status = status;
        }
        // Dropped events can make a later one arrive first; never step back
        view.progress_percent = view.progress_percent.max(event.progress_percent);
        view.last_message = event.message.clone();
    }

    pub fn get(&self, job_id: &Uuid) -> Option<&JobView> {
        self.jobs.get(job_id)
    }

    /// Views in first-seen order.
    pub fn views(&self) -> impl Iterator<Item = (&Uuid, &JobView)> {
        self.order.iter().filter_map(|id| self.jobs.get(id).map(|v| (id, v)))
    }

    pub fn active(&self) -> impl Iterator<Item = &JobView> {
        self.views().map(|(_, v)| v).filter(|v| !v.status.is_terminal())
    }

    pub fn batch(&self) -> BatchProgress {
        BatchProgress::from_percents(self.active().map(|v| v.progress_percent))
    }

    pub fn count(&self, status: TransferStatus) -> usize {
        self.jobs.values().filter(|v| v.status == status).count()
    }
}
