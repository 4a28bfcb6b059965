//! Normalization of the `modified` strings reported by the storage server.
//!
//! The server reports ISO-8601 timestamps in whatever zone the backing
//! storage uses. To compare a source and destination entry they are brought
//! onto one naive clock:
//!
//! - a trailing `Z` is shifted forward by a configurable number of hours
//!   (8 by default, matching servers deployed in UTC+8),
//! - an explicit `+HH:MM` / `-HH:MM` offset is subtracted,
//! - a bare timestamp is used as-is.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

/// Hours added to timestamps carrying an explicit UTC `Z` suffix.
pub const DEFAULT_UTC_SHIFT_HOURS: i64 = 8;

fn iso_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})(\.\d+)?([+-]\d{2}:\d{2}|Z)?",
            )
            .ok()
        })
        .as_ref()
}

/// Parse a server timestamp onto the shared naive clock.
///
/// Returns `None` when the string is not ISO-8601, names an impossible date,
/// or the shift pushes it outside chrono's range.
pub fn normalize_modified(raw: &str, utc_shift_hours: i64) -> Option<NaiveDateTime> {
    let caps = iso_pattern()?.captures(raw.trim())?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let micros = match caps.get(7) {
        Some(frac) => fraction_to_micros(&frac.as_str()[1..]),
        None => 0,
    };

    let dt = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?
        .and_hms_micro_opt(field(4)?, field(5)?, field(6)?, micros)?;

    match caps.get(8).map(|m| m.as_str()) {
        Some("Z") => dt.checked_add_signed(Duration::try_hours(utc_shift_hours)?),
        Some(offset) => {
            let sign = if offset.starts_with('+') { 1 } else { -1 };
            let hours: i64 = offset[1..3].parse().ok()?;
            let minutes: i64 = offset[4..6].parse().ok()?;
            let shift = Duration::hours(sign * hours) + Duration::minutes(sign * minutes);
            dt.checked_sub_signed(shift)
        }
        None => Some(dt),
    }
}

/// Truncate a fractional-second digit string to microseconds.
fn fraction_to_micros(digits: &str) -> u32 {
    let mut padded: String = digits.chars().take(6).collect();
    while padded.len() < 6 {
        padded.push('0');
    }
    padded.parse().unwrap_or(0)
}

/// True when `dest` is strictly newer than `source` after normalization.
///
/// An unparsable timestamp on either side counts as "not newer".
pub fn destination_is_newer(source: &str, dest: &str, utc_shift_hours: i64) -> bool {
    match (
        normalize_modified(source, utc_shift_hours),
        normalize_modified(dest, utc_shift_hours),
    ) {
        (Some(src), Some(dst)) => dst > src,
        _ => false,
    }
}
