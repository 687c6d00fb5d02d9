//! The per-race in-memory sample buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use slipstream_types::{EntryId, TelemetrySample};
use tracing::warn;

/// In-memory telemetry for one race.
///
/// Two queues under one lock: `recent` is the capped ring serving read
/// APIs; `pending` holds samples awaiting persistence. The lock is held
/// only for queue manipulation, never across I/O.
#[derive(Debug)]
pub struct RaceBuffer {
    cap: usize,
    inner: Mutex<BufferInner>,
}

#[derive(Debug, Default)]
struct BufferInner {
    recent: VecDeque<TelemetrySample>,
    pending: VecDeque<TelemetrySample>,
}

impl RaceBuffer {
    /// Create a buffer retaining at most `cap` recent samples.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            inner: Mutex::new(BufferInner::default()),
        }
    }

    /// Append a sample. Returns the pending queue length so the caller
    /// can decide whether to trigger a flush.
    pub fn record(&self, sample: TelemetrySample) -> usize {
        let mut inner = self.lock();
        inner.recent.push_back(sample.clone());
        while inner.recent.len() > self.cap {
            inner.recent.pop_front();
        }
        inner.pending.push_back(sample);
        // The pending queue is bounded too: a permanently failing sink
        // must not grow memory without limit. Dropped samples are logged,
        // never silently discarded.
        let mut dropped: usize = 0;
        while inner.pending.len() > self.cap {
            inner.pending.pop_front();
            dropped = dropped.saturating_add(1);
        }
        if dropped > 0 {
            warn!(dropped, "pending telemetry overflow, oldest samples dropped");
        }
        inner.pending.len()
    }

    /// Atomically drain the entire pending queue for a flush attempt.
    pub fn take_pending(&self) -> Vec<TelemetrySample> {
        let mut inner = self.lock();
        inner.pending.drain(..).collect()
    }

    /// Push a failed batch back to the *front* of the pending queue,
    /// preserving order, so the next flush retries it first.
    pub fn requeue_front(&self, batch: Vec<TelemetrySample>) {
        let mut inner = self.lock();
        for sample in batch.into_iter().rev() {
            inner.pending.push_front(sample);
        }
    }

    /// The most recent `n` samples, oldest first.
    pub fn latest(&self, n: usize) -> Vec<TelemetrySample> {
        let inner = self.lock();
        let skip = inner.recent.len().saturating_sub(n);
        inner.recent.iter().skip(skip).cloned().collect()
    }

    /// The most recent `n` samples for one entry, oldest first.
    pub fn latest_for_entry(&self, entry_id: EntryId, n: usize) -> Vec<TelemetrySample> {
        let inner = self.lock();
        let mut matched: Vec<TelemetrySample> = inner
            .recent
            .iter()
            .rev()
            .filter(|s| s.entry_id == Some(entry_id))
            .take(n)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// All retained samples taken strictly after `ts`, oldest first.
    pub fn since(&self, ts: DateTime<Utc>) -> Vec<TelemetrySample> {
        let inner = self.lock();
        inner
            .recent
            .iter()
            .filter(|s| s.timestamp > ts)
            .cloned()
            .collect()
    }

    /// Number of samples awaiting persistence.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
