//! Actual departure inference from GPS telemetry.
//!
//! Given a trip's log restricted to the window starting fifteen minutes
//! before the scheduled departure, the real departure instant is resolved by
//! a three-tier fallback: checkpoint-exit detection against the route
//! geometry, a speed-run heuristic around the first stop, and finally the
//! first usable log point. Each tier is tried in order and the first success
//! wins; the result is tagged with the tier that produced it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::engine::geometry::{decode_checkpoints, within_radius};
use crate::model::{Direction, GpsLogPoint, RouteStop, TripTransaction};

/// How far before the scheduled departure telemetry is considered.
pub const SCHEDULE_LOOKBACK_MINUTES: i64 = 15;

/// Origin geofence radius for restricted-stop services.
pub const RESTRICTED_ORIGIN_RADIUS_M: f64 = 100.0;
/// Origin geofence radius for everything else.
pub const ORIGIN_RADIUS_M: f64 = 200.0;
/// Radius used to confirm the bus reached a later checkpoint.
pub const CONFIRM_RADIUS_M: f64 = 200.0;

/// Upper bound on points scanned by the speed-run heuristic.
pub const SPEED_RUN_SCAN_LIMIT: usize = 250;
/// Minimum speed for a point to count towards the run.
pub const SPEED_RUN_THRESHOLD: f64 = 20.0;
/// Consecutive fast points required to resolve a departure.
pub const SPEED_RUN_LENGTH: usize = 5;

/// Outcome of the departure inference, tagged by the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartInference {
    /// The bus was seen leaving the origin geofence.
    CheckpointExit { timestamp_ms: i64 },
    /// A sustained speed run near the first stop marked the departure.
    SpeedRun { timestamp_ms: i64 },
    /// Nothing better than the first point in the filtered window.
    FirstLog {
        timestamp_ms: i64,
        /// The chosen point's local date differs from the observed start
        /// date and no same-date point existed; non-fatal, for observability.
        date_mismatch: bool,
    },
    /// The filtered window was empty; actuals fall back to observed times.
    NoUsableLog,
}

impl StartInference {
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self {
            StartInference::CheckpointExit { timestamp_ms }
            | StartInference::SpeedRun { timestamp_ms }
            | StartInference::FirstLog { timestamp_ms, .. } => Some(*timestamp_ms),
            StartInference::NoUsableLog => None,
        }
    }
}

/// Restricts the raw log to points at or after (scheduled − 15 min).
///
/// When the window's first point carries the null nearest-stop sentinel it
/// inherits the nearest-stop fields of the first raw point, so the speed-run
/// tier still knows where scanning began. Without a schedule the whole log
/// is used.
pub fn filter_log(log: &[GpsLogPoint], scheduled_at: Option<DateTime<Utc>>) -> Vec<GpsLogPoint> {
    let mut filtered: Vec<GpsLogPoint> = match scheduled_at {
        Some(scheduled) => {
            let threshold =
                (scheduled - Duration::minutes(SCHEDULE_LOOKBACK_MINUTES)).timestamp_millis();
            log.iter()
                .filter(|point| point.timestamp_ms >= threshold)
                .cloned()
                .collect()
        }
        None => log.to_vec(),
    };

    if let (Some(first_filtered), Some(first_raw)) = (filtered.first_mut(), log.first()) {
        if first_filtered.stop_name.is_none() {
            first_filtered.stop_name = first_raw.stop_name.clone();
            first_filtered.stop_sequence = first_raw.stop_sequence;
            first_filtered.stop_id = first_raw.stop_id;
        }
    }

    filtered
}

/// Runs the three-tier fallback over an already-filtered log.
pub fn infer_actual_start(
    trx: &TripTransaction,
    filtered: &[GpsLogPoint],
    first_stop: Option<&RouteStop>,
    tz: Tz,
) -> StartInference {
    if filtered.is_empty() {
        return StartInference::NoUsableLog;
    }

    if let Some(timestamp_ms) = detect_checkpoint_exit(trx, filtered) {
        return StartInference::CheckpointExit { timestamp_ms };
    }

    if let Some(timestamp_ms) = detect_speed_run(filtered, first_stop) {
        return StartInference::SpeedRun { timestamp_ms };
    }

    first_log_fallback(trx, filtered, tz)
}

/// Tier 1: scan for the bus leaving the origin geofence.
///
/// While a point sits inside the origin radius the exit candidate is reset;
/// the first point outside it afterwards becomes the candidate. Reaching any
/// later checkpoint confirms the candidate and stops the scan, but a
/// candidate still pending at the end of the log wins as well — re-entering
/// the origin is the only thing that clears it.
fn detect_checkpoint_exit(trx: &TripTransaction, filtered: &[GpsLogPoint]) -> Option<i64> {
    let encoded = trx.route_polyline.as_deref().filter(|p| !p.is_empty())?;
    let mut checkpoints = decode_checkpoints(encoded);
    if checkpoints.is_empty() {
        return None;
    }
    if trx.direction == Direction::Inbound {
        checkpoints.reverse();
    }

    let origin = checkpoints[0];
    let origin_radius = if trx.restricted_stop {
        RESTRICTED_ORIGIN_RADIUS_M
    } else {
        ORIGIN_RADIUS_M
    };

    let mut inside_origin = false;
    let mut exit_candidate: Option<i64> = None;

    for point in filtered {
        let within_origin = within_radius(
            point.latitude,
            point.longitude,
            origin.latitude,
            origin.longitude,
            origin_radius,
        );

        if within_origin {
            inside_origin = true;
            exit_candidate = None;
        } else if inside_origin {
            if exit_candidate.is_none() {
                exit_candidate = Some(point.timestamp_ms);
            }

            let reached_other_checkpoint = checkpoints[1..].iter().any(|checkpoint| {
                within_radius(
                    point.latitude,
                    point.longitude,
                    checkpoint.latitude,
                    checkpoint.longitude,
                    CONFIRM_RADIUS_M,
                )
            });
            if reached_other_checkpoint {
                break;
            }
        }
    }

    exit_candidate
}

/// Tier 2: five consecutive fast points after passing the first stop.
fn detect_speed_run(filtered: &[GpsLogPoint], first_stop: Option<&RouteStop>) -> Option<i64> {
    let first_stop = first_stop?;
    let start_name = first_stop.name.trim().to_lowercase();
    let start_sequence = first_stop.sequence;

    let mut highest_sequence = 0u32;
    let mut passed_first_stop = false;
    let mut run = 0usize;

    for (idx, point) in filtered.iter().take(SPEED_RUN_SCAN_LIMIT).enumerate() {
        if let Some(sequence) = point.stop_sequence {
            if sequence > highest_sequence {
                highest_sequence = sequence;
            }
        }

        if !passed_first_stop {
            if let Some(name) = &point.stop_name {
                if name.trim().to_lowercase() == start_name {
                    passed_first_stop = true;
                }
            }
        }

        if passed_first_stop {
            if point.speed >= SPEED_RUN_THRESHOLD {
                run += 1;
                if run == SPEED_RUN_LENGTH {
                    let timestamp_ms = if highest_sequence == start_sequence {
                        point.timestamp_ms
                    } else if highest_sequence == start_sequence + 1 {
                        filtered[idx - (SPEED_RUN_LENGTH - 1)].timestamp_ms
                    } else {
                        filtered[0].timestamp_ms
                    };
                    return Some(timestamp_ms);
                }
            } else {
                run = 0;
            }
        }
    }

    None
}

/// Tier 3: the first filtered point, substituting a same-date point when the
/// first one's local date disagrees with the observed start date.
fn first_log_fallback(
    trx: &TripTransaction,
    filtered: &[GpsLogPoint],
    tz: Tz,
) -> StartInference {
    let first = &filtered[0];
    let mut timestamp_ms = first.timestamp_ms;
    let mut date_mismatch = false;

    if let Some(started_at) = trx.started_at {
        let started_date = started_at.with_timezone(&tz).date_naive();
        if local_date_of_millis(timestamp_ms, tz) != Some(started_date) {
            match filtered
                .iter()
                .find(|point| local_date_of_millis(point.timestamp_ms, tz) == Some(started_date))
            {
                Some(matching) => timestamp_ms = matching.timestamp_ms,
                None => {
                    date_mismatch = true;
                    warn!(
                        trip_id = %trx.trip_id,
                        "no log point matches the observed start date"
                    );
                }
            }
        }
    }

    StartInference::FirstLog {
        timestamp_ms,
        date_mismatch,
    }
}

fn local_date_of_millis(timestamp_ms: i64, tz: Tz) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|instant| instant.with_timezone(&tz).date_naive())
}
