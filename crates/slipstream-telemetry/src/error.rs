//! Errors for the persistence sink.

/// Errors that can occur while persisting a telemetry batch.
///
/// The store recovers from all of these by requeueing the batch; they
/// are logged and never surfaced to the tick loop.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A `PostgreSQL` operation failed.
    #[error("postgres persist error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Serialization of a sample payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink refused the batch (used by the in-memory test sink).
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
