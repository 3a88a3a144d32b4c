//! Time bucketing helpers shared by rate limiting, aggregation and partitioning

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};

/// Compact day key used by daily usage counters and usage stats (`YYYYMMDD`)
pub fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d").to_string()
}

/// Floor a timestamp to its containing 5-minute bucket
pub fn floor_to_five_minutes(ts: DateTime<Utc>) -> DateTime<Utc> {
    let minute = ts.minute() - ts.minute() % 5;
    ts.with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Floor a timestamp to the top of its hour
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Bounds of the last fully completed hour: `[start, end)`
pub fn previous_hour_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = floor_to_hour(now);
    (end - ChronoDuration::hours(1), end)
}

/// First day of the month containing `date`
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("valid first of month")
}

/// First day of the month after the one containing `date`
pub fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of next month")
}

/// Midnight UTC of a date
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_day_key() {
        assert_eq!(day_key(ts("2025-11-14T10:00:00Z")), "20251114");
        assert_eq!(day_key(ts("2025-01-02T23:59:59Z")), "20250102");
    }

    #[test]
    fn test_floor_to_five_minutes() {
        assert_eq!(
            floor_to_five_minutes(ts("2025-11-14T10:17:45.123Z")),
            ts("2025-11-14T10:15:00Z")
        );
        assert_eq!(
            floor_to_five_minutes(ts("2025-11-14T10:00:00Z")),
            ts("2025-11-14T10:00:00Z")
        );
    }

    #[test]
    fn test_previous_hour_bounds() {
        let (start, end) = previous_hour_bounds(ts("2025-11-14T10:17:45Z"));
        assert_eq!(start, ts("2025-11-14T09:00:00Z"));
        assert_eq!(end, ts("2025-11-14T10:00:00Z"));
    }

    #[test]
    fn test_month_boundaries() {
        let d = NaiveDate::from_ymd_opt(2025, 12, 14).unwrap();
        assert_eq!(first_of_month(d), NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(
            first_of_next_month(d),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        );
    }
}
