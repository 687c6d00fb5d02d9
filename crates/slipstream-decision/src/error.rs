//! Errors for decision providers.

/// Errors that can occur while obtaining a decision from a provider.
///
/// The tick loop absorbs all of these by substituting the fallback
/// controller; they are logged, never surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request could not be completed.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (may be truncated).
        body: String,
    },

    /// The response text did not contain a usable decision.
    #[error("malformed decision payload: {0}")]
    Parse(String),
}
