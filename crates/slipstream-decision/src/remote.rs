//! OpenAI-compatible remote decision backend.
//!
//! Sends a compact one-line state prompt to `{api_url}/chat/completions`
//! and expects a JSON decision object back. Calls are retried a bounded
//! number of times with linear backoff before the error is handed to the
//! tick loop (which then substitutes the fallback controller). The tick
//! loop additionally bounds the whole call with its own timeout, so the
//! retry budget here must fit inside that window.

use std::time::Duration;

use slipstream_types::{Decision, DecisionContext};
use tracing::warn;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::parse;

/// Backend for OpenAI-compatible chat completions APIs.
pub struct RemoteProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    backoff_step: Duration,
}

impl RemoteProvider {
    /// Create a remote provider from configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            backoff_step: Duration::from_millis(config.backoff_step_ms),
        }
    }

    /// Obtain a decision for the given context.
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] once the retry budget is
    /// exhausted.
    pub async fn decide(&self, ctx: &DecisionContext) -> Result<Decision, ProviderError> {
        let prompt = compose_prompt(ctx);
        let mut attempt: u32 = 0;

        loop {
            let result = match self.request(&prompt).await {
                Ok(text) => parse::parse_decision(&text),
                Err(e) => Err(e),
            };

            match result {
                Ok(decision) => return Ok(decision),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    warn!(
                        car_id = %ctx.car.id,
                        attempt,
                        error = %e,
                        "remote decision call failed, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                    let backoff = self
                        .backoff_step
                        .checked_mul(attempt)
                        .unwrap_or(self.backoff_step);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Issue one chat completions request and return the message content.
    async fn request(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.api_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a race driver controlling a car. \
                                Respond only with JSON: {\"throttle\":0..1, \"steer\":-1..1, \"brake\":0..1}."
                },
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.4,
            "max_tokens": 80
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(format!("chat completions call failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("response body was not JSON: {e}")))?;

        extract_content(&json)
    }
}

impl std::fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Compose the compact one-line state prompt.
fn compose_prompt(ctx: &DecisionContext) -> String {
    format!(
        "Race {} | Lap {}/{} | Speed={:.1} m/s | Fuel={:.1}% | TireWear={:.1}% | \
         RemainingLap={:.0} m | NearbyCars={}. \
         Return ONLY JSON: {{\"throttle\":float, \"steer\":float, \"brake\":float}}",
        ctx.race.id,
        ctx.race.lap,
        ctx.race.max_laps,
        ctx.car.speed,
        ctx.car.fuel,
        ctx.car.tire_wear,
        ctx.track.remaining_lap_distance,
        ctx.nearby.len(),
    )
}

/// Extract `choices[0].message.content` from a chat completions response.
fn extract_content(json: &serde_json::Value) -> Result<String, ProviderError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            ProviderError::Parse("response missing choices[0].message.content".to_owned())
        })
}
