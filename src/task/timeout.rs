//! Timeout duration strings: "45s", "30m", "2h", or a bare integer (seconds).

use crate::error::{BridgeError, Result};
use std::time::Duration;

/// Parse a producer-facing timeout string into a duration.
pub fn parse_timeout(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(BridgeError::Validation("empty timeout".to_string()));
    }

    let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
        b'h' => (&s[..s.len() - 1], 3600),
        b'm' => (&s[..s.len() - 1], 60),
        b's' => (&s[..s.len() - 1], 1),
        _ => (s, 1),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| BridgeError::Validation(format!("invalid timeout: {s:?}")))?;
    let seconds = value
        .checked_mul(multiplier)
        .ok_or_else(|| BridgeError::Validation(format!("timeout out of range: {s:?}")))?;

    Ok(Duration::from_secs(seconds))
}
