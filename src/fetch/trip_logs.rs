//! Bounded-concurrency retrieval of per-trip GPS logs.
//!
//! Classification is a pure function of (transaction, log, geometry), so
//! every log must be resolved into memory before the engine runs. Trip ids
//! are pulled in batches through a fixed-size worker pool; a failed fetch
//! degrades that trip to "no GPS log" instead of aborting the batch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::fetch::api::UpstreamApi;
use crate::fetch::http::HttpClient;
use crate::model::GpsLogPoint;

/// Worker-pool sizing for log retrieval.
#[derive(Debug, Clone, Copy)]
pub struct TripLogConfig {
    pub concurrency: usize,
    pub batch_size: usize,
}

impl TripLogConfig {
    /// Defaults scale with the memory the runtime reports, overridable via
    /// `TRIP_LOG_CONCURRENCY` / `TRIP_LOG_BATCH_SIZE`.
    pub fn from_env() -> Self {
        let memory_mb: u64 = std::env::var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        let (concurrency, batch_size) = match memory_mb {
            m if m >= 8192 => (40, 400),
            m if m >= 4096 => (30, 300),
            m if m >= 2048 => (20, 200),
            m if m >= 1024 => (12, 120),
            _ => (8, 80),
        };

        let concurrency = env_override("TRIP_LOG_CONCURRENCY", concurrency);
        let batch_size = env_override("TRIP_LOG_BATCH_SIZE", batch_size);

        Self {
            concurrency: concurrency.max(1),
            batch_size: batch_size.max(1),
        }
    }
}

fn env_override(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Resolves every trip's log into a map keyed by trip id. Trips whose log
/// is empty or fails to load get no entry.
pub async fn load_trip_logs<C: HttpClient + 'static>(
    api: Arc<UpstreamApi<C>>,
    trip_ids: Vec<String>,
    config: TripLogConfig,
) -> HashMap<String, Vec<GpsLogPoint>> {
    info!(
        trips = trip_ids.len(),
        concurrency = config.concurrency,
        batch_size = config.batch_size,
        "loading trip logs"
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut logs = HashMap::new();

    for batch in trip_ids.chunks(config.batch_size) {
        let mut tasks = Vec::with_capacity(batch.len());

        for trip_id in batch {
            let api = api.clone();
            let semaphore = semaphore.clone();
            let trip_id = trip_id.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (trip_id, Vec::new());
                };

                match api.trip_log(&trip_id).await {
                    Ok(points) => (trip_id, points),
                    Err(err) => {
                        warn!(trip_id = %trip_id, error = %err, "trip log fetch failed, degrading to no GPS log");
                        (trip_id, Vec::new())
                    }
                }
            }));
        }

        for task in tasks {
            match task.await {
                Ok((trip_id, points)) if !points.is_empty() => {
                    logs.insert(trip_id, points);
                }
                Ok((trip_id, _)) => {
                    debug!(trip_id = %trip_id, "no usable trip log");
                }
                Err(err) => {
                    warn!(error = %err, "trip log task panicked");
                }
            }
        }
    }

    info!(resolved = logs.len(), "trip logs loaded");
    logs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override_parses_or_defaults() {
        assert_eq!(env_override("TRIP_LOG_TEST_UNSET_VARIABLE", 7), 7);
    }

    #[test]
    fn test_config_never_zero() {
        let config = TripLogConfig::from_env();
        assert!(config.concurrency >= 1);
        assert!(config.batch_size >= 1);
    }
}
