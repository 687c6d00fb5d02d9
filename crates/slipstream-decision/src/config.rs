//! Provider backend configuration.

use serde::Deserialize;

/// Configuration for the decision provider backend.
///
/// `backend` selects the variant: `"remote"` for an OpenAI-compatible
/// chat completions API, `"heuristic"` for the local rule-based driver.
/// An unconfigured or unknown backend degrades to the heuristic with a
/// warning rather than failing engine construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Backend name: `remote` or `heuristic`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key (empty disables the remote backend).
    #[serde(default)]
    pub api_key: String,

    /// Model name sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Retry attempts after the first failed call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request HTTP timeout in milliseconds (must stay below the
    /// engine's decision timeout so retries fit inside it).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Linear backoff step between retries, milliseconds.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Seed for the heuristic driver's jitter.
    #[serde(default = "default_heuristic_seed")]
    pub heuristic_seed: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff_step_ms: default_backoff_step_ms(),
            heuristic_seed: default_heuristic_seed(),
        }
    }
}

fn default_backend() -> String {
    "heuristic".to_owned()
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_owned()
}

fn default_model() -> String {
    "gpt-4o-mini".to_owned()
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_request_timeout_ms() -> u64 {
    2500
}

const fn default_backoff_step_ms() -> u64 {
    200
}

const fn default_heuristic_seed() -> u64 {
    42
}
