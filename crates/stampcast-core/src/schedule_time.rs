//! Parsing of operator-supplied schedule times.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::AppError;

const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parse a schedule time and require it to be strictly after `now`.
///
/// Accepts RFC 3339 (offset included) or `YYYY-MM-DD HH:MM[:SS]`, the latter
/// interpreted as wall-clock time in `tz`.
pub fn parse_schedule_time(
    input: &str,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AppError> {
    let input = input.trim();

    let parsed = match DateTime::parse_from_rfc3339(input) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => parse_local(input, tz)?,
    };

    if parsed <= now {
        return Err(AppError::Validation(format!(
            "Scheduled time {} is not in the future",
            parsed.to_rfc3339()
        )));
    }

    Ok(parsed)
}

fn parse_local(input: &str, tz: Tz) -> Result<DateTime<Utc>, AppError> {
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| {
            AppError::Validation(format!(
                "Invalid time '{}': use RFC 3339 or YYYY-MM-DD HH:MM",
                input
            ))
        })?;

    // Ambiguous wall-clock times (DST fall-back) resolve to the earlier instant.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            AppError::Validation(format!(
                "Time '{}' does not exist in time zone {}",
                input, tz
            ))
        })
}
