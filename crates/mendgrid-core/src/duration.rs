//! Duration strings used throughout policy specs and config files.
//!
//! Accepted forms: `"500ms"`, `"10s"`, `"5m"`, `"1h"`, or a bare integer
//! meaning seconds.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {0:?}: expected forms like 500ms, 10s, 5m, 1h")]
pub struct DurationError(pub String);

/// Parse a duration string like "5s", "500ms", "1m", "2h".
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let trimmed = s.trim();
    let invalid = || DurationError(s.to_string());

    let parsed = if let Some(ms) = trimmed.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = trimmed.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(invalid)
}

/// Parse a duration, falling back to `default` when the string is malformed.
pub fn parse_duration_or(s: &str, default: Duration) -> Duration {
    parse_duration(s).unwrap_or(default)
}

/// Whole seconds, rounding any sub-second remainder up.
///
/// Timestamps are kept in epoch seconds, so a "held for at least" check
/// must never come due early.
pub fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Parse a duration straight into whole seconds (see `ceil_secs`).
pub fn parse_secs(s: &str) -> Result<u64, DurationError> {
    parse_duration(s).map(ceil_secs)
}
