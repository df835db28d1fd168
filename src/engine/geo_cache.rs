//! Memoized geo-hit counting for trips.
//!
//! Counting how often a trip's telemetry intersected the route geometry is
//! the most expensive part of classification and is needed twice per trip
//! (stop coverage and geometry completion), so results are computed once per
//! key and never mutated after insertion.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use crate::engine::geometry::{decode_checkpoints, within_radius};
use crate::model::{Direction, GpsLogPoint, RouteStop, TripTransaction};

/// Radius around the very first checkpoint that counts as a start hit.
pub const START_HIT_RADIUS_M: f64 = 100.0;
/// Radius around every other probed checkpoint and around stops.
pub const CHECKPOINT_HIT_RADIUS_M: f64 = 200.0;

/// Checkpoint indices probed for departure evidence. Index 5 is skipped on
/// short geometries.
const START_CHECKPOINT_INDICES: [usize; 2] = [0, 5];

/// Composite cache key. The geometry participates through a hash so two
/// directions sharing a trip and route but not a polyline never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoKey {
    trip_id: String,
    route_id: i64,
    direction: Direction,
    geometry_hash: u64,
}

impl GeoKey {
    pub fn for_transaction(trx: &TripTransaction) -> Self {
        let mut hasher = DefaultHasher::new();
        trx.route_polyline.as_deref().unwrap_or("").hash(&mut hasher);

        Self {
            trip_id: trx.trip_id.clone(),
            route_id: trx.route_id,
            direction: trx.direction,
            geometry_hash: hasher.finish(),
        }
    }
}

/// How often a trip's telemetry intersected the route geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoHitCounts {
    /// Checkpoints 0 and 5 approached at least once each; never exceeds 2.
    pub start_hits: u8,
    /// Interior checkpoints approached at least once each.
    pub between_hits: u32,
    /// Distinct stop sequence numbers approached within radius.
    pub stop_hits: BTreeSet<u32>,
}

/// Per-run memoization of [`GeoHitCounts`] by [`GeoKey`].
#[derive(Debug, Default)]
pub struct GeoHitCache {
    entries: HashMap<GeoKey, GeoHitCounts>,
}

impl GeoHitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hit counts for the transaction's trip, computing them on
    /// first access. `stops` is the full stop list for the route; filtering
    /// by direction happens here. `log` is the trip's telemetry, possibly
    /// empty.
    pub fn counts(
        &mut self,
        trx: &TripTransaction,
        stops: &[RouteStop],
        log: &[GpsLogPoint],
    ) -> &GeoHitCounts {
        let key = GeoKey::for_transaction(trx);
        self.entries
            .entry(key)
            .or_insert_with(|| compute_hits(trx, stops, log))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn compute_hits(trx: &TripTransaction, stops: &[RouteStop], log: &[GpsLogPoint]) -> GeoHitCounts {
    let mut counts = GeoHitCounts::default();

    if log.is_empty() {
        return counts;
    }

    if let Some(encoded) = trx.route_polyline.as_deref().filter(|p| !p.is_empty()) {
        let checkpoints = decode_checkpoints(encoded);

        if !checkpoints.is_empty() {
            for idx in START_CHECKPOINT_INDICES {
                let Some(checkpoint) = checkpoints.get(idx) else {
                    continue;
                };
                let radius = if idx == 0 {
                    START_HIT_RADIUS_M
                } else {
                    CHECKPOINT_HIT_RADIUS_M
                };
                let approached = log.iter().any(|point| {
                    within_radius(
                        point.latitude,
                        point.longitude,
                        checkpoint.latitude,
                        checkpoint.longitude,
                        radius,
                    )
                });
                if approached {
                    counts.start_hits += 1;
                }
            }

            for checkpoint in checkpoints.iter().take(checkpoints.len().saturating_sub(1)).skip(1) {
                let approached = log.iter().any(|point| {
                    within_radius(
                        point.latitude,
                        point.longitude,
                        checkpoint.latitude,
                        checkpoint.longitude,
                        CHECKPOINT_HIT_RADIUS_M,
                    )
                });
                if approached {
                    counts.between_hits += 1;
                }
            }
        }
    }

    for stop in stops.iter().filter(|stop| stop.direction == trx.direction) {
        let approached = log.iter().any(|point| {
            within_radius(
                point.latitude,
                point.longitude,
                stop.latitude,
                stop.longitude,
                CHECKPOINT_HIT_RADIUS_M,
            )
        });
        if approached {
            counts.stop_hits.insert(stop.sequence);
        }
    }

    counts
}
