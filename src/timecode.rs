//! `HH:MM:SS` handling: pulling a running time out of free text, converting it
//! to and from a seconds count, and applying the display-lag offset.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{LivememoError, Result};
use crate::store::Offset;

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // ASCII word boundaries: a time glued to Hangul text still matches.
        Regex::new(r"(?-u:\b)([0-9]{2}:[0-9]{2}:[0-9]{2})(?-u:\b)").expect("time pattern is valid")
    })
}

/// Return the first `HH:MM:SS` substring of `text`, bounded by word edges.
///
/// Shorter forms such as `1:02:03` never match.
pub fn extract_time(text: &str) -> Option<&str> {
    time_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether `text` could be a running-time display.
pub fn looks_like_timer_text(text: &str) -> bool {
    time_pattern().is_match(text)
}

/// Parse `h:m:s` into a seconds count. Component ranges are not checked, so
/// `00:75:00` is 4500.
pub fn to_seconds(hms: &str) -> Result<i64> {
    let mut parts = hms.split(':');
    let mut next = || -> Result<i64> {
        parts
            .next()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .ok_or_else(|| LivememoError::InvalidTimecode(hms.to_string()))
    };
    let (h, m, s) = (next()?, next()?, next()?);
    if parts.next().is_some() {
        return Err(LivememoError::InvalidTimecode(hms.to_string()));
    }
    Ok(h * 3600 + m * 60 + s)
}

/// Format a seconds count as zero-padded `HH:MM:SS`. Negative totals clamp to
/// zero; hours widen past two digits instead of wrapping.
pub fn to_hms(total_seconds: i64) -> String {
    let sec = total_seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        sec / 3600,
        (sec % 3600) / 60,
        sec % 60
    )
}

/// Shift `hms` back by `offset` seconds, never earlier than `00:00:00`.
pub fn apply_offset(hms: &str, offset: Offset) -> Result<String> {
    Ok(to_hms(to_seconds(hms)? - i64::from(offset.seconds())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_time_returns_first_match() {
        assert_eq!(extract_time("스트리밍 00:10:05"), Some("00:10:05"));
        assert_eq!(extract_time("01:00:00 then 02:00:00"), Some("01:00:00"));
        assert_eq!(extract_time("live for 12:34:56 now"), Some("12:34:56"));
    }

    #[test]
    fn extract_time_matches_next_to_hangul() {
        assert_eq!(extract_time("스트리밍00:10:05"), Some("00:10:05"));
        assert_eq!(extract_time("00:10:05스트리밍 중"), Some("00:10:05"));
        assert!(looks_like_timer_text("라이브01:02:03시청"));
    }

    #[test]
    fn extract_time_ignores_partial_forms() {
        assert_eq!(extract_time("1:2:3"), None);
        assert_eq!(extract_time("1:02:03"), None);
        assert_eq!(extract_time("001:02:03"), None);
        assert_eq!(extract_time("00:10"), None);
        assert_eq!(extract_time(""), None);
    }

    #[test]
    fn extract_time_skips_partial_and_finds_later_match() {
        assert_eq!(extract_time("1:02:03 / 00:00:07"), Some("00:00:07"));
    }

    #[test]
    fn to_seconds_accepts_out_of_range_components() {
        assert_eq!(to_seconds("00:00:00").unwrap(), 0);
        assert_eq!(to_seconds("01:02:03").unwrap(), 3723);
        assert_eq!(to_seconds("00:75:00").unwrap(), 4500);
    }

    #[test]
    fn to_seconds_rejects_malformed_input() {
        assert!(to_seconds("01:02").is_err());
        assert!(to_seconds("01:02:03:04").is_err());
        assert!(to_seconds("aa:bb:cc").is_err());
    }

    #[test]
    fn to_hms_clamps_negative_to_zero() {
        assert_eq!(to_hms(-1), "00:00:00");
        assert_eq!(to_hms(i64::MIN / 2), "00:00:00");
    }

    #[test]
    fn to_hms_widens_large_hours() {
        assert_eq!(to_hms(100 * 3600 + 61), "100:01:01");
    }

    #[test]
    fn round_trip_for_conventional_values() {
        for s in ["00:00:00", "00:00:59", "00:59:00", "09:08:07", "23:59:59", "99:59:59"] {
            assert_eq!(to_hms(to_seconds(s).unwrap()), s);
        }
    }

    #[test]
    fn apply_offset_never_goes_below_zero() {
        assert_eq!(apply_offset("00:10:05", Offset::new(2)).unwrap(), "00:10:03");
        assert_eq!(apply_offset("00:00:03", Offset::new(5)).unwrap(), "00:00:00");
        assert_eq!(apply_offset("01:00:00", Offset::new(1)).unwrap(), "00:59:59");
        assert_eq!(apply_offset("00:00:09", Offset::default()).unwrap(), "00:00:09");
    }

    #[test]
    fn validity_predicate_matches_time_substring() {
        assert!(looks_like_timer_text("00:12:34 스트리밍 중"));
        assert!(looks_like_timer_text("00:12:34"));
        assert!(!looks_like_timer_text("시청자 1,234명"));
    }
}
