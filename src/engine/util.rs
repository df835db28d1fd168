//! Small shared helpers: currency rounding and local-time formatting.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Rounds a currency amount up to the next cent ("round half up" via
/// ceiling-to-cent, the convention of the claim report).
pub fn ceil_to_cent(amount: f64) -> f64 {
    (amount * 100.0).ceil() / 100.0
}

/// `HH:MM` in the reporting timezone, `-` when absent.
pub fn fmt_local_hm(instant: Option<DateTime<Utc>>, tz: Tz) -> String {
    match instant {
        Some(instant) => instant.with_timezone(&tz).format("%H:%M").to_string(),
        None => "-".to_string(),
    }
}

/// `HH:MM:SS` in the reporting timezone, `-` when absent.
pub fn fmt_local_hms(instant: Option<DateTime<Utc>>, tz: Tz) -> String {
    match instant {
        Some(instant) => instant.with_timezone(&tz).format("%H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

/// `HH:MM:SS` of an epoch-milliseconds instant, `-` when absent or out of
/// range.
pub fn fmt_millis_hms(timestamp_ms: Option<i64>, tz: Tz) -> String {
    fmt_local_hms(
        timestamp_ms.and_then(DateTime::<Utc>::from_timestamp_millis),
        tz,
    )
}

/// `DD/MM/YYYY` in the reporting timezone, empty when absent.
pub fn fmt_local_date(instant: Option<DateTime<Utc>>, tz: Tz) -> String {
    match instant {
        Some(instant) => instant.with_timezone(&tz).format("%d/%m/%Y").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::REPORT_TZ;
    use crate::testutil::instant;

    #[test]
    fn test_ceil_to_cent() {
        assert_eq!(ceil_to_cent(0.0), 0.0);
        assert_eq!(ceil_to_cent(1.2), 1.2);
        assert_eq!(ceil_to_cent(1.231), 1.24);
        assert_eq!(ceil_to_cent(10.001), 10.01);
    }

    #[test]
    fn test_local_formatting() {
        let at = Some(instant("2024-08-20T00:03:09Z"));
        assert_eq!(fmt_local_hm(at, REPORT_TZ), "08:03");
        assert_eq!(fmt_local_hms(at, REPORT_TZ), "08:03:09");
        assert_eq!(fmt_local_date(at, REPORT_TZ), "20/08/2024");
        assert_eq!(fmt_local_hm(None, REPORT_TZ), "-");
        assert_eq!(fmt_local_hms(None, REPORT_TZ), "-");
        assert_eq!(fmt_local_date(None, REPORT_TZ), "");
    }

    #[test]
    fn test_millis_formatting() {
        let at = instant("2024-08-20T00:03:09Z");
        assert_eq!(
            fmt_millis_hms(Some(at.timestamp_millis()), REPORT_TZ),
            "08:03:09"
        );
        assert_eq!(fmt_millis_hms(None, REPORT_TZ), "-");
    }
}
