//! Errors for the engine binary.

/// Errors that can occur during engine startup or the demo race run.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// Configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: slipstream_core::config::ConfigError,
    },

    /// The configured database could not be reached.
    #[error("database error: {message}")]
    Database {
        /// Description of the failure.
        message: String,
    },

    /// A lifecycle operation on the demo race failed.
    #[error("lifecycle error: {source}")]
    Lifecycle {
        /// The underlying engine error.
        #[from]
        source: slipstream_core::EngineError,
    },

    /// The race bootstrap section could not be parsed.
    #[error("bootstrap error: {message}")]
    Bootstrap {
        /// Description of the failure.
        message: String,
    },
}
