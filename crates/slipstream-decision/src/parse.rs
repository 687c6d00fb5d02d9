//! Response parsing into a typed [`Decision`].
//!
//! A remote model returns raw text that is ideally JSON but often
//! arrives wrapped in prose or a markdown fence. Recovery strategies,
//! in order: direct parse, then extraction of the outermost brace pair.
//! Missing fields default to `0.0`; every successful parse is clamped.
//!
//! [`Decision`]: slipstream_types::Decision

use slipstream_types::Decision;

use crate::error::ProviderError;

/// Parse a provider response into a clamped [`Decision`].
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] if no strategy yields valid JSON
/// containing an object.
pub fn parse_decision(raw: &str) -> Result<Decision, ProviderError> {
    let trimmed = raw.trim();

    // Strategy 1: the whole response is the JSON object.
    if let Ok(decision) = serde_json::from_str::<Decision>(trimmed) {
        return Ok(decision.clamped());
    }

    // Strategy 2: pull the outermost brace pair out of surrounding text.
    if let Some(json) = extract_json(trimmed)
        && let Ok(decision) = serde_json::from_str::<Decision>(json)
    {
        return Ok(decision.clamped());
    }

    Err(ProviderError::Parse(format!(
        "no decision object found in response: {trimmed}"
    )))
}

/// Slice from the first `{` to the last `}`, if both exist in order.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end >= start { text.get(start..=end) } else { None }
}
