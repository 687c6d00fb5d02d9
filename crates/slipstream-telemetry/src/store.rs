//! The telemetry store: per-race buffers in front of one shared sink.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use slipstream_types::{EntryId, RaceId, TelemetrySample};
use tracing::{debug, warn};

use crate::buffer::RaceBuffer;
use crate::config::TelemetryConfig;
use crate::sink::TelemetrySink;

/// Buffers telemetry per race and flushes batches to the sink.
///
/// The registry of buffers is behind its own lock, and each buffer has
/// its own lock in turn; neither is ever held across a sink write.
#[derive(Debug)]
pub struct TelemetryStore {
    config: TelemetryConfig,
    sink: TelemetrySink,
    races: Mutex<BTreeMap<RaceId, Arc<RaceBuffer>>>,
}

impl TelemetryStore {
    /// Create a store in front of the given sink.
    pub fn new(config: TelemetryConfig, sink: TelemetrySink) -> Self {
        Self {
            config,
            sink,
            races: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record one sample, flushing inline if the race's pending queue
    /// has reached the batch size.
    pub async fn record(&self, sample: TelemetrySample) {
        let race_id = sample.race_id;
        let buffer = self.buffer(race_id);
        let pending = buffer.record(sample);
        if pending >= self.config.batch_size {
            self.flush_race(race_id).await;
        }
    }

    /// Flush one race's pending samples to the sink.
    ///
    /// On failure the batch goes back to the front of the pending queue
    /// for the next attempt. Returns the number of samples handed to the
    /// sink successfully.
    pub async fn flush_race(&self, race_id: RaceId) -> usize {
        let Some(buffer) = self.existing_buffer(race_id) else {
            return 0;
        };
        let batch = buffer.take_pending();
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        match self.sink.persist(&batch).await {
            Ok(()) => {
                debug!(race_id = %race_id, count, "flushed telemetry batch");
                count
            }
            Err(e) => {
                warn!(race_id = %race_id, count, error = %e, "telemetry flush failed, requeueing batch");
                buffer.requeue_front(batch);
                0
            }
        }
    }

    /// Flush every race's pending samples. Used by the background
    /// flusher and at shutdown.
    pub async fn flush_all(&self) {
        let race_ids: Vec<RaceId> = {
            let races = self.lock_races();
            races.keys().copied().collect()
        };
        for race_id in race_ids {
            let _ = self.flush_race(race_id).await;
        }
    }

    /// Spawn the background flusher task for this store.
    ///
    /// Runs until the returned handle is aborted. The interval comes
    /// from the store's configuration.
    pub fn spawn_flusher(store: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = store.config.flush_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                store.flush_all().await;
            }
        })
    }

    /// The most recent `n` samples for a race, oldest first.
    pub fn latest(&self, race_id: RaceId, n: usize) -> Vec<TelemetrySample> {
        self.existing_buffer(race_id)
            .map(|b| b.latest(n))
            .unwrap_or_default()
    }

    /// The most recent `n` samples for one entry, oldest first.
    pub fn latest_for_entry(
        &self,
        race_id: RaceId,
        entry_id: EntryId,
        n: usize,
    ) -> Vec<TelemetrySample> {
        self.existing_buffer(race_id)
            .map(|b| b.latest_for_entry(entry_id, n))
            .unwrap_or_default()
    }

    /// All retained samples for a race taken strictly after `ts`.
    pub fn since(&self, race_id: RaceId, ts: DateTime<Utc>) -> Vec<TelemetrySample> {
        self.existing_buffer(race_id)
            .map(|b| b.since(ts))
            .unwrap_or_default()
    }

    /// Samples awaiting persistence for a race.
    pub fn pending_len(&self, race_id: RaceId) -> usize {
        self.existing_buffer(race_id)
            .map(|b| b.pending_len())
            .unwrap_or(0)
    }

    fn buffer(&self, race_id: RaceId) -> Arc<RaceBuffer> {
        let mut races = self.lock_races();
        Arc::clone(
            races
                .entry(race_id)
                .or_insert_with(|| Arc::new(RaceBuffer::new(self.config.ring_cap))),
        )
    }

    fn existing_buffer(&self, race_id: RaceId) -> Option<Arc<RaceBuffer>> {
        self.lock_races().get(&race_id).cloned()
    }

    fn lock_races(&self) -> std::sync::MutexGuard<'_, BTreeMap<RaceId, Arc<RaceBuffer>>> {
        self.races
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
