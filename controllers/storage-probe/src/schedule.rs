//! # Schedule Spreading
//!
//! Probes sharing a period would otherwise all fire on the same minute.
//! A CRC-32C of the identifying strings picks a stable minute offset inside
//! the period, so desired-state comparison never sees the schedule drift.

use std::num::NonZeroU32;

/// Offset in `[0, period)` derived from the concatenation of `parts`
#[must_use]
pub fn spread_offset(parts: &[&str], period_minutes: NonZeroU32) -> u32 {
    let checksum = parts
        .iter()
        .fold(0, |crc, part| crc32c::crc32c_append(crc, part.as_bytes()));
    checksum % period_minutes.get()
}

/// Cron expression firing every `period_minutes`, starting at the spread offset
#[must_use]
pub fn cron_schedule(parts: &[&str], period_minutes: NonZeroU32) -> String {
    let offset = spread_offset(parts, period_minutes);
    format!("{offset}-59/{period_minutes} * * * *")
}
