//! Terminal formatting.

use chrono::Local;
use engine::{BatchProgress, JobView, LogEntry, TransferJob};
use std::time::Duration;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// 20-cell bar, one cell per 5%.
pub fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = (percent / 5) as usize;
    format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
}

/// `14:02:11 [SUCCESS] Successfully transferred a.jpg to NAS.`
pub fn render_entry(entry: &LogEntry) -> String {
    format!(
        "{} [{}] {}",
        entry.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        entry.level,
        entry.message
    )
}

pub fn render_job(view: &JobView) -> String {
    format!("{}: {}", view.file_name, progress_bar(view.progress_percent))
}

pub fn render_batch(batch: &BatchProgress) -> String {
    format!(
        "Overall: {} across {} active transfers",
        progress_bar(batch.rounded_percent()),
        batch.active
    )
}

/// One line per failed job for the final report.
pub fn render_failure(job: &TransferJob) -> String {
    match &job.last_error {
        Some(error) => format!("  {}: {}", job.file_name, error),
        None => format!("  {}: (unknown error)", job.file_name),
    }
}
