//! Duration strings in the `1m30s` notation used by `probeThreshold`.

use crate::error::CrdError;
use std::time::Duration;

const UNITS: &[(&str, f64)] = &[
    ("ns", 1e-9),
    ("us", 1e-6),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
];

/// Parse a duration such as `"30s"`, `"1m"`, `"1m30s"` or `"1.5m"`.
///
/// A bare `"0"` is accepted. Every other number must carry a unit and
/// negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, CrdError> {
    let invalid = |reason| CrdError::InvalidDuration(input.to_string(), reason);

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(invalid("missing unit"));
        }
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid("unknown unit"))?;
        rest = &rest[unit_len..];

        total += value * scale;
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid("out of range"))
}
