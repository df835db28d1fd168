//! Per-trip verdicts: punctuality and the two completion signals.
//!
//! The thresholds here are business-tuned operational constants. They are
//! reproduced as named values so they can be revisited without touching the
//! classification logic.

use chrono::{DateTime, Duration, Utc};

use crate::engine::geo_cache::GeoHitCounts;

/// Minutes a trip may depart before its schedule and still be punctual.
pub const PUNCTUAL_EARLY_MINUTES: i64 = 10;
/// Minutes a trip may depart after its schedule and still be punctual.
pub const PUNCTUAL_LATE_MINUTES: i64 = 6;
/// Share of a direction's stops that must be approached for stop-coverage
/// completion, in percent.
pub const STOP_COVERAGE_PERCENT: usize = 15;
/// Start hits required for geometry completion.
pub const MIN_START_HITS: u8 = 2;
/// Between hits required for geometry completion.
pub const MIN_BETWEEN_HITS: u32 = 1;

pub const ON_TIME: &str = "ON TIME";
pub const NOT_PUNCTUAL: &str = "NOT PUNCTUAL";
pub const COMPLETE: &str = "Complete";
pub const NO_COMPLETE: &str = "No Complete";

pub const DETAIL_NO_GPS: &str = "No GPS Tracking";
pub const DETAIL_OUTSIDE_SCHEDULE: &str = "Trip outside schedule";

/// Punctuality verdict for an inferred departure instant.
///
/// "ON TIME" requires a scheduled start, an observed start, and the inferred
/// instant inside [scheduled − 10 min, scheduled + 6 min] inclusive, or an
/// instant matching the schedule to the minute.
pub fn punctuality(
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    actual_start_ms: Option<i64>,
) -> &'static str {
    let (Some(scheduled), Some(_started), Some(actual_ms)) =
        (scheduled_at, started_at, actual_start_ms)
    else {
        return NOT_PUNCTUAL;
    };
    let Some(actual) = DateTime::<Utc>::from_timestamp_millis(actual_ms) else {
        return NOT_PUNCTUAL;
    };

    let window_start = scheduled - Duration::minutes(PUNCTUAL_EARLY_MINUTES);
    let window_end = scheduled + Duration::minutes(PUNCTUAL_LATE_MINUTES);
    let in_window = actual >= window_start && actual <= window_end;
    let same_minute = actual.timestamp().div_euclid(60) == scheduled.timestamp().div_euclid(60);

    if in_window || same_minute {
        ON_TIME
    } else {
        NOT_PUNCTUAL
    }
}

/// Stop-coverage completion: the trip ended and approached at least 15% of
/// the stops defined for its route+direction.
pub fn stop_coverage_status(
    has_observed_end: bool,
    stops_hit: usize,
    direction_stop_total: usize,
) -> &'static str {
    if direction_stop_total == 0 {
        return NO_COMPLETE;
    }
    // hits >= total * 15% without leaving integer arithmetic.
    if has_observed_end && stops_hit * 100 >= direction_stop_total * STOP_COVERAGE_PERCENT {
        COMPLETE
    } else {
        NO_COMPLETE
    }
}

/// Geometry completion: the route has a polyline and the telemetry touched
/// both probed start checkpoints plus at least one interior checkpoint.
pub fn geometry_status(has_geometry: bool, counts: &GeoHitCounts) -> &'static str {
    if has_geometry && counts.start_hits >= MIN_START_HITS && counts.between_hits >= MIN_BETWEEN_HITS
    {
        COMPLETE
    } else {
        NO_COMPLETE
    }
}

/// Legacy status-detail column.
pub fn status_detail(has_log: bool, scheduled_at: Option<DateTime<Utc>>) -> &'static str {
    if !has_log {
        DETAIL_NO_GPS
    } else if scheduled_at.is_none() {
        DETAIL_OUTSIDE_SCHEDULE
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::instant;
    use std::collections::BTreeSet;

    fn ms(raw: &str) -> Option<i64> {
        Some(instant(raw).timestamp_millis())
    }

    #[test]
    fn test_punctuality_window_inclusive() {
        let scheduled = Some(instant("2024-08-20T08:00:00+08:00"));
        let started = Some(instant("2024-08-20T08:03:00+08:00"));

        // Exactly ten minutes early and exactly six minutes late both pass.
        assert_eq!(
            punctuality(scheduled, started, ms("2024-08-20T07:50:00+08:00")),
            ON_TIME
        );
        assert_eq!(
            punctuality(scheduled, started, ms("2024-08-20T08:06:00+08:00")),
            ON_TIME
        );
        assert_eq!(
            punctuality(scheduled, started, ms("2024-08-20T07:49:59+08:00")),
            NOT_PUNCTUAL
        );
        assert_eq!(
            punctuality(scheduled, started, ms("2024-08-20T08:06:01+08:00")),
            NOT_PUNCTUAL
        );
    }

    #[test]
    fn test_punctuality_requires_schedule_and_observed_start() {
        let actual = ms("2024-08-20T08:00:00+08:00");
        assert_eq!(
            punctuality(None, Some(instant("2024-08-20T08:00:00+08:00")), actual),
            NOT_PUNCTUAL
        );
        assert_eq!(
            punctuality(Some(instant("2024-08-20T08:00:00+08:00")), None, actual),
            NOT_PUNCTUAL
        );
        assert_eq!(
            punctuality(
                Some(instant("2024-08-20T08:00:00+08:00")),
                Some(instant("2024-08-20T08:00:00+08:00")),
                None
            ),
            NOT_PUNCTUAL
        );
    }

    #[test]
    fn test_stop_coverage_threshold() {
        // 3 of 20 is exactly 15%.
        assert_eq!(stop_coverage_status(true, 3, 20), COMPLETE);
        // 2 of 20 is 10%.
        assert_eq!(stop_coverage_status(true, 2, 20), NO_COMPLETE);
        // No observed end never completes.
        assert_eq!(stop_coverage_status(false, 20, 20), NO_COMPLETE);
        // No stops defined never completes.
        assert_eq!(stop_coverage_status(true, 0, 0), NO_COMPLETE);
    }

    #[test]
    fn test_geometry_status_thresholds() {
        let complete = GeoHitCounts {
            start_hits: 2,
            between_hits: 1,
            stop_hits: BTreeSet::new(),
        };
        assert_eq!(geometry_status(true, &complete), COMPLETE);
        assert_eq!(geometry_status(false, &complete), NO_COMPLETE);

        let weak_start = GeoHitCounts {
            start_hits: 1,
            between_hits: 5,
            stop_hits: BTreeSet::new(),
        };
        assert_eq!(geometry_status(true, &weak_start), NO_COMPLETE);

        let no_between = GeoHitCounts {
            start_hits: 2,
            between_hits: 0,
            stop_hits: BTreeSet::new(),
        };
        assert_eq!(geometry_status(true, &no_between), NO_COMPLETE);
    }

    #[test]
    fn test_status_detail() {
        assert_eq!(status_detail(false, None), DETAIL_NO_GPS);
        assert_eq!(status_detail(true, None), DETAIL_OUTSIDE_SCHEDULE);
        assert_eq!(
            status_detail(true, Some(instant("2024-08-20T08:00:00+08:00"))),
            ""
        );
    }
}
