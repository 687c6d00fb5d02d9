//! Persistence sinks for telemetry batches.
//!
//! The sink is enum-dispatched: `PostgreSQL` in production, an in-memory
//! sink for tests and sink-less demo runs. Both are idempotent on the
//! sample's natural key `(race_id, car_id, ts)`, which is what makes the
//! buffer's at-least-once delivery safe.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use slipstream_types::TelemetrySample;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SinkError;

/// Default rows per INSERT statement.
const DEFAULT_CHUNK_SIZE: usize = 100;

/// A destination for telemetry batches.
#[derive(Debug)]
pub enum TelemetrySink {
    /// Durable `PostgreSQL` storage.
    Postgres(PostgresSink),
    /// In-memory storage for tests and demo runs.
    Memory(MemorySink),
}

impl TelemetrySink {
    /// Persist a batch of samples.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the write fails; the caller requeues the
    /// batch in that case.
    pub async fn persist(&self, samples: &[TelemetrySample]) -> Result<(), SinkError> {
        match self {
            Self::Postgres(sink) => sink.persist(samples).await,
            Self::Memory(sink) => sink.persist(samples),
        }
    }
}

/// Telemetry sink writing to the `telemetry` table.
#[derive(Debug)]
pub struct PostgresSink {
    pool: PgPool,
    chunk_size: usize,
}

impl PostgresSink {
    /// Create a sink bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the rows-per-statement chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Batch-insert samples using a multi-row UNNEST statement.
    ///
    /// Each chunk is one round-trip in one transaction. `ON CONFLICT DO
    /// NOTHING` on the natural key makes redelivery of a previously
    /// committed batch a no-op.
    async fn persist(&self, samples: &[TelemetrySample]) -> Result<(), SinkError> {
        if samples.is_empty() {
            return Ok(());
        }

        for chunk in samples.chunks(self.chunk_size.max(1)) {
            let len = chunk.len();
            let mut race_ids = Vec::with_capacity(len);
            let mut entry_ids: Vec<Option<Uuid>> = Vec::with_capacity(len);
            let mut car_ids = Vec::with_capacity(len);
            let mut timestamps = Vec::with_capacity(len);
            let mut tick_intervals = Vec::with_capacity(len);
            let mut laps = Vec::with_capacity(len);
            let mut speeds = Vec::with_capacity(len);
            let mut positions = Vec::with_capacity(len);
            let mut orientations = Vec::with_capacity(len);
            let mut decisions = Vec::with_capacity(len);

            for sample in chunk {
                race_ids.push(sample.race_id.into_inner());
                entry_ids.push(sample.entry_id.map(slipstream_types::EntryId::into_inner));
                car_ids.push(sample.car_id.into_inner());
                timestamps.push(sample.timestamp);
                tick_intervals.push(sample.tick_interval);
                laps.push(i32::try_from(sample.lap).unwrap_or(i32::MAX));
                speeds.push(sample.speed);
                positions.push(serde_json::to_value(sample.position)?);
                orientations.push(sample.orientation);
                decisions.push(serde_json::to_value(sample.decision)?);
            }

            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r"INSERT INTO telemetry (race_id, entry_id, car_id, ts, tick_interval, lap, speed, position, orientation, decision)
                  SELECT * FROM UNNEST($1::UUID[], $2::UUID[], $3::UUID[], $4::TIMESTAMPTZ[], $5::DOUBLE PRECISION[], $6::INT[], $7::DOUBLE PRECISION[], $8::JSONB[], $9::DOUBLE PRECISION[], $10::JSONB[])
                  ON CONFLICT (race_id, car_id, ts) DO NOTHING",
            )
            .bind(&race_ids)
            .bind(&entry_ids)
            .bind(&car_ids)
            .bind(&timestamps)
            .bind(&tick_intervals)
            .bind(&laps)
            .bind(&speeds)
            .bind(&positions)
            .bind(&orientations)
            .bind(&decisions)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }

        tracing::debug!(count = samples.len(), "persisted telemetry batch (UNNEST)");
        Ok(())
    }
}

/// In-memory sink with injectable failures, for tests and sink-less runs.
///
/// Cloning shares the underlying storage, so a test can keep a handle
/// for assertions after handing the sink to the store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Mutex<Vec<TelemetrySample>>,
    failures_remaining: AtomicU32,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` persist calls fail before writing anything.
    pub fn fail_times(&self, n: u32) {
        self.inner.failures_remaining.store(n, Ordering::Release);
    }

    /// Snapshot of everything persisted so far.
    pub fn persisted(&self) -> Vec<TelemetrySample> {
        self.lock_rows().clone()
    }

    /// Number of persisted samples.
    pub fn persisted_len(&self) -> usize {
        self.lock_rows().len()
    }

    fn persist(&self, samples: &[TelemetrySample]) -> Result<(), SinkError> {
        let remaining = self.inner.failures_remaining.load(Ordering::Acquire);
        if remaining > 0 {
            self.inner
                .failures_remaining
                .store(remaining.saturating_sub(1), Ordering::Release);
            return Err(SinkError::Unavailable(String::from(
                "injected memory sink failure",
            )));
        }

        let mut rows = self.lock_rows();
        for sample in samples {
            // Idempotent on the natural key, mirroring the Postgres sink.
            let duplicate = rows.iter().any(|existing| {
                existing.race_id == sample.race_id
                    && existing.car_id == sample.car_id
                    && existing.timestamp == sample.timestamp
            });
            if !duplicate {
                rows.push(sample.clone());
            }
        }
        Ok(())
    }

    fn lock_rows(&self) -> std::sync::MutexGuard<'_, Vec<TelemetrySample>> {
        self.inner
            .rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
