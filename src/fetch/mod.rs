//! Upstream I/O: the HTTP seam, the claim-store API client, and the
//! bounded-concurrency trip log loader.

mod http;
pub mod api;
pub mod trip_logs;

pub use http::{BasicClient, HttpClient};
