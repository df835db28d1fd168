//! Schedule reconciliation for ad-hoc trips.
//!
//! A trip that started without an assigned schedule is matched after the
//! fact against the timetable for its route, direction and day of week: the
//! planned departure whose time of day is numerically closest to the
//! observed start becomes the trip's scheduled start, and likewise for the
//! end. Transactions that already carry a scheduled time pass through
//! untouched.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::model::{Timetable, TimetableEntry, TripTransaction};

/// Fold base for the closest-time search, in seconds since midnight. With an
/// empty timetable the search resolves here, so callers see a midnight
/// schedule; such a result is degenerate and the trip stays flagged ad-hoc.
pub const RECONCILE_BASE_SECONDS: u32 = 0;

/// Reconciles every transaction in the batch against the timetable.
pub fn reconcile(
    transactions: Vec<TripTransaction>,
    timetable: &Timetable,
    tz: Tz,
) -> Vec<TripTransaction> {
    transactions
        .into_iter()
        .map(|trx| reconcile_one(trx, timetable, tz))
        .collect()
}

fn reconcile_one(mut trx: TripTransaction, timetable: &Timetable, tz: Tz) -> TripTransaction {
    let Some(started_at) = trx.started_at else {
        return trx;
    };
    if trx.scheduled_at.is_some() {
        return trx;
    }

    let local_start = started_at.with_timezone(&tz);
    let date = local_start.date_naive();
    let entries = timetable.entries(trx.route_id, trx.direction, local_start.weekday());

    if entries.is_empty() {
        debug!(
            trip_id = %trx.trip_id,
            route_id = trx.route_id,
            "no timetable entries for ad-hoc trip, reconciling to the degenerate base"
        );
    }

    let start_goal = local_start.time().num_seconds_from_midnight();
    let end_goal = trx
        .ended_at
        .map(|ended| ended.with_timezone(&tz).time().num_seconds_from_midnight())
        .unwrap_or(RECONCILE_BASE_SECONDS);

    let closest_start = closest_seconds(entries, start_goal, |entry| entry.start_time);
    let closest_end = closest_seconds(entries, end_goal, |entry| entry.end_time);

    trx.adhoc = true;
    trx.scheduled_at = local_instant(tz, date, closest_start);
    trx.scheduled_end = local_instant(tz, date, closest_end);
    trx
}

/// Closest entry time-of-day to `goal`, compared as seconds since midnight.
/// Strict improvement keeps the first entry on ties, matching the stable
/// ordering of the timetable.
fn closest_seconds(
    entries: &[TimetableEntry],
    goal: u32,
    time_of: impl Fn(&TimetableEntry) -> NaiveTime,
) -> u32 {
    entries.iter().fold(RECONCILE_BASE_SECONDS, |best, entry| {
        let candidate = time_of(entry).num_seconds_from_midnight();
        let candidate_diff = (i64::from(candidate) - i64::from(goal)).abs();
        let best_diff = (i64::from(best) - i64::from(goal)).abs();
        if candidate_diff < best_diff {
            candidate
        } else {
            best
        }
    })
}

fn local_instant(tz: Tz, date: NaiveDate, seconds_from_midnight: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds_from_midnight, 0)?;
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|instant| instant.with_timezone(&Utc))
}
