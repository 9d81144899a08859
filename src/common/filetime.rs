//! Windows FILETIME conversion.
//!
//! A FILETIME counts 100-nanosecond intervals since 1601-01-01 UTC. Directory entries
//! and property sets store it as a raw little-endian `u64`; zero means "not set".

use chrono::{DateTime, Utc};

/// FILETIME ticks between 1601-01-01 and the Unix epoch.
pub const WINDOWS_EPOCH_OFFSET: i64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: i128 = 10_000_000;

/// Convert a raw FILETIME into a UTC timestamp.
///
/// Returns `None` for zero and for values chrono cannot represent.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = filetime as i128 - WINDOWS_EPOCH_OFFSET as i128;
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
}

/// Convert a UTC timestamp into a raw FILETIME.
///
/// Instants before 1601 clamp to zero; sub-tick precision is truncated.
pub fn datetime_to_filetime(dt: &DateTime<Utc>) -> u64 {
    let ticks = dt.timestamp() as i128 * TICKS_PER_SECOND
        + (dt.timestamp_subsec_nanos() / 100) as i128
        + WINDOWS_EPOCH_OFFSET as i128;
    u64::try_from(ticks.max(0)).unwrap_or(u64::MAX)
}
