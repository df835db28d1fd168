//! Trip actuals inference and claim aggregation for scheduled bus services.
//!
//! Fare transactions are reconciled against planned timetables and recorded
//! GPS telemetry to infer when each trip really departed and whether it was
//! completed, then rolled up into the hierarchical claim report used for
//! billing and punctuality auditing.

pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;

#[cfg(test)]
pub mod testutil;
