//! Progress events and the bus that fans them out.
//!
//! Jobs publish `ProgressEvent`s; any number of subscribers read them. The
//! bus decouples the engine from whatever renders progress (CLI, GUI, logs).
//!
//! Publishing never blocks. Each subscriber owns a bounded buffer; when it is
//! full the oldest buffered event is discarded to make room. Subscribers are
//! display-only: the authoritative state of a job is its own record.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{TransferJob, TransferStatus};

/// One progress notification from a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub file_name: String,
    pub message: String,
    pub progress_percent: u8,
    /// Set when this event marks a state transition
    pub status: Option<TransferStatus>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job: &TransferJob, message: impl Into<String>, status: Option<TransferStatus>) -> Self {
        ProgressEvent {
            job_id: job.id,
            file_name: job.file_name.clone(),
            message: message.into(),
            progress_percent: job.progress_percent,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}

struct SubscriberSlot {
    tx: Sender<ProgressEvent>,
    /// Publisher-side handle on the same queue, used to evict the oldest event
    evict: Receiver<ProgressEvent>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

struct BusShared {
    capacity: usize,
    subscribers: Mutex<Vec<SubscriberSlot>>,
}

/// Multi-consumer event bus with drop-oldest buffering.
#[derive(Clone)]
pub struct ProgressBus {
    shared: Arc<BusShared>,
}

impl ProgressBus {
    /// `capacity` is the per-subscriber buffer size (at least 1).
    pub fn new(capacity: usize) -> Self {
        ProgressBus {
            shared: Arc::new(BusShared {
                capacity: capacity.max(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Deliver `event` to every live subscriber without waiting on any of them.
    pub fn publish(&self, event: ProgressEvent) {
        // Holding the list lock for the whole fan-out keeps a single global
        // publish order, so per-job order survives on every subscriber.
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|s| !s.closed.load(Ordering::Acquire));

        for slot in subscribers.iter() {
            let mut pending = event.clone();
            loop {
                match slot.tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        if slot.evict.try_recv().is_ok() {
                            let total = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                            if total.is_power_of_two() {
                                log::warn!("slow progress subscriber; {} events dropped so far", total);
                            }
                        }
                        pending = back;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }

    /// Start receiving events published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(self.shared.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        self.shared.subscribers.lock().push(SubscriberSlot {
            tx,
            evict: rx.clone(),
            dropped: Arc::clone(&dropped),
            closed: Arc::clone(&closed),
        });
        Subscription { rx, dropped, closed }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .iter()
            .filter(|s| !s.closed.load(Ordering::Acquire))
            .count()
    }
}

/// Receiving end of the bus.
///
/// Iterating blocks until the next event and ends once every handle on the
/// bus has been dropped and the buffer is drained.
pub struct Subscription {
    rx: Receiver<ProgressEvent>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    pub fn recv(&self) -> Option<ProgressEvent> {
        self.rx.recv().ok()
    }

    /// `Ok(None)` on timeout, `Err(())` once the bus is gone.
    #[allow(clippy::result_unit_err)]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ProgressEvent>, ()> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(()),
        }
    }

    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.rx.try_iter().collect()
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Iterator for Subscription {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
