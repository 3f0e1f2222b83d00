//! Timezone-aware timestamp parsing for table-suffix comparison.

use crate::error::{Error, Result};
use jiff::Zoned;
use jiff::civil::{DateTime, Time};
use jiff::fmt::strtime::{self, BrokenDownTime};
use jiff::tz::{Offset, TimeZone};

/// Resolve a timezone spec into a [`TimeZone`].
///
/// Accepts fixed numeric offsets (`+09:00`, `-0500`, `+09`), the literal
/// `UTC`, and IANA names containing a slash (`Asia/Tokyo`).
pub fn resolve_zone(timezone: &str) -> Result<TimeZone> {
    if let Some(offset) = parse_numeric_offset(timezone) {
        return Ok(TimeZone::fixed(offset));
    }
    if timezone == "UTC" {
        return Ok(TimeZone::UTC);
    }
    if timezone.contains('/') {
        return TimeZone::get(timezone)
            .map_err(|e| Error::Time(format!("unknown timezone `{timezone}`: {e}")));
    }
    Err(Error::Time(format!("timezone format is invalid: {timezone}")))
}

// [+-]HH, [+-]HHMM, [+-]HH:MM
fn parse_numeric_offset(timezone: &str) -> Option<Offset> {
    let (sign, rest) = match timezone.as_bytes().first()? {
        b'+' => (1i32, &timezone[1..]),
        b'-' => (-1i32, &timezone[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.len() {
        2 => (rest, "0"),
        4 => (&rest[..2], &rest[2..]),
        5 if rest.as_bytes()[2] == b':' => (&rest[..2], &rest[3..]),
        _ => return None,
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    let seconds = sign * (hours * 3600 + minutes * 60);
    Offset::from_seconds(seconds).ok()
}

/// Parse `input` with a strftime-style `format`, interpreting the wall
/// clock in `timezone`. Fields the format leaves unset default to midnight.
pub fn strptime_with_zone(input: &str, format: &str, timezone: &str) -> Result<Zoned> {
    let zone = resolve_zone(timezone)?;
    let parsed = BrokenDownTime::parse(format, input)
        .map_err(|e| Error::Time(format!("cannot parse `{input}` with `{format}`: {e}")))?;
    let date = parsed
        .to_date()
        .map_err(|e| Error::Time(format!("cannot parse `{input}` with `{format}`: {e}")))?;
    let time = parsed.to_time().unwrap_or(Time::midnight());
    DateTime::from_parts(date, time)
        .to_zoned(zone)
        .map_err(|e| Error::Time(format!("invalid timestamp `{input}`: {e}")))
}

/// Format a zoned timestamp with a strftime-style `format`.
pub fn format_with_zone(zoned: &Zoned, format: &str) -> Result<String> {
    strtime::format(format, zoned)
        .map_err(|e| Error::Time(format!("cannot format with `{format}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_offset(timezone: &str) -> Offset {
        resolve_zone(timezone).unwrap().to_fixed_offset().unwrap()
    }

    #[test]
    fn test_resolve_numeric_offsets() {
        assert_eq!(fixed_offset("+09:00"), Offset::constant(9));
        assert_eq!(fixed_offset("-0500"), Offset::constant(-5));
        assert_eq!(fixed_offset("+09"), Offset::constant(9));
    }

    #[test]
    fn test_resolve_utc_and_names() {
        assert_eq!(fixed_offset("UTC"), Offset::UTC);
        assert!(resolve_zone("Asia/Tokyo").is_ok());
        assert!(matches!(resolve_zone("JST"), Err(Error::Time(_))));
        assert!(matches!(resolve_zone("No/Such_Zone"), Err(Error::Time(_))));
    }

    #[test]
    fn test_strptime_date_only_defaults_to_midnight() {
        let zoned = strptime_with_zone("20160229", "%Y%m%d", "UTC").unwrap();
        assert_eq!(zoned.date(), jiff::civil::date(2016, 2, 29));
        assert_eq!(zoned.time(), Time::midnight());
    }

    #[test]
    fn test_strptime_interprets_wall_clock_in_zone() {
        let tokyo = strptime_with_zone("20160101 090000", "%Y%m%d %H%M%S", "+09:00").unwrap();
        let utc = strptime_with_zone("20160101 000000", "%Y%m%d %H%M%S", "UTC").unwrap();
        assert_eq!(tokyo.timestamp(), utc.timestamp());
    }

    #[test]
    fn test_strptime_rejects_garbage() {
        assert!(matches!(
            strptime_with_zone("not_a_date", "%Y%m%d", "UTC"),
            Err(Error::Time(_))
        ));
    }

    #[test]
    fn test_format_round_trips_suffix() {
        let zoned = strptime_with_zone("20160229", "%Y%m%d", "UTC").unwrap();
        assert_eq!(format_with_zone(&zoned, "%Y%m%d").unwrap(), "20160229");
    }
}
