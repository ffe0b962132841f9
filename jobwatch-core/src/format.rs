//! Timestamp parsing and formatting helpers shared across surfaces.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a log timestamp.
///
/// RFC 3339 with `Z` or a numeric offset is the norm; a bare
/// `YYYY-MM-DDTHH:MM:SS[.fff]` is read as UTC.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Format a timestamp relative to `now` (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an optional raw timestamp relative to `now`, or `-` when missing or unparseable.
pub fn format_relative_opt(ts: Option<&str>, now: DateTime<Utc>) -> String {
    match ts.and_then(parse_timestamp) {
        Some(ts) => format_relative_time(ts, now),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_parse_timestamp_offsets() {
        let z = parse_timestamp("2024-01-01T08:00:00Z").unwrap();
        let offset = parse_timestamp("2024-01-01T00:00:00-08:00").unwrap();
        assert_eq!(z, offset);

        let naive = parse_timestamp("2024-01-01T08:00:00").unwrap();
        assert_eq!(naive, z);

        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_format_relative_time() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(format_relative_time(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(format_relative_time(now - Duration::minutes(3), now), "3m ago");
        assert_eq!(format_relative_time(now - Duration::hours(2), now), "2h ago");
        assert_eq!(format_relative_time(now - Duration::days(3), now), "3d ago");
        assert_eq!(format_relative_time(now - Duration::days(30), now), "Feb 09");
        assert_eq!(format_relative_time(now + Duration::minutes(1), now), "just now");
    }

    #[test]
    fn test_format_relative_opt() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(format_relative_opt(None, now), "-");
        assert_eq!(format_relative_opt(Some("garbage"), now), "-");
        assert_eq!(
            format_relative_opt(Some("2024-03-10T11:00:00Z"), now),
            "1h ago"
        );
    }
}
