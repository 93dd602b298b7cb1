//! Unix-second helpers. Chunk keys are plain `i64` seconds; these exist for
//! logging and CLI parsing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Current time in unix seconds.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Render unix seconds as `YYYY-MM-DD HH:MM:SS`, or the raw number when out
/// of chrono's range.
pub fn format_unix(t: i64) -> String {
    match Utc.timestamp_opt(t, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => t.to_string(),
    }
}

/// Parse either raw unix seconds, RFC 3339, or `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_unix(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(t) = s.parse::<i64>() {
        return Some(t);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_unix() {
        assert_eq!(format_unix(0), "1970-01-01 00:00:00");
        assert_eq!(format_unix(1_000_000_000), "2001-09-09 01:46:40");
    }

    #[test]
    fn test_parse_unix() {
        assert_eq!(parse_unix("12345"), Some(12345));
        assert_eq!(parse_unix("2001-09-09 01:46:40"), Some(1_000_000_000));
        assert_eq!(parse_unix("2001-09-09T01:46:40Z"), Some(1_000_000_000));
        assert_eq!(parse_unix("yesterday"), None);
    }

    #[test]
    fn test_now_is_recent() {
        assert!(now_unix() > 1_600_000_000);
    }
}
