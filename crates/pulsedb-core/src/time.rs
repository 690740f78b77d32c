//! Clock and TTL duration helpers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Grammar for TTL duration strings: `"<number><s|m|h|d>"`, e.g. `"1.5h"`.
static TTL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*(s|m|h|d)$").expect("ttl regex"));

/// Current time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a TTL duration string into milliseconds.
///
/// Returns `None` when the string does not match the grammar or the result
/// rounds down to zero.
pub fn parse_ttl_text(text: &str) -> Option<u64> {
    let captures = TTL_RE.captures(text.trim())?;
    let amount: f64 = captures[1].parse().ok()?;
    let multiplier: f64 = match &captures[2] {
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => return None,
    };
    let ms = amount * multiplier;
    if !ms.is_finite() || ms < 1.0 {
        return None;
    }
    Some(ms as u64)
}
