//! Date parsing for date-valued case attributes.
//!
//! Attribute values are free-form strings written by several producers, so a
//! handful of layouts are accepted. Time-of-day parts are ignored.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S"];

/// Parse a date attribute value. Returns `None` for blank or unrecognized input.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Some(datetime.date());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|datetime| datetime.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_accepted_layouts() {
        assert_eq!(parse_date("2024-01-01"), Some(ymd(2024, 1, 1)));
        assert_eq!(parse_date(" 01.02.2024 "), Some(ymd(2024, 2, 1)));
        assert_eq!(parse_date("2024-03-05 10:11:12"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_date("2024-03-05T23:00:00+03:00"), Some(ymd(2024, 3, 5)));
    }

    #[test]
    fn test_rejected_values() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("tomorrow"), None);
        assert_eq!(parse_date("2024-13-01"), None);
    }
}
