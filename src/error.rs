//! Structured failure taxonomy for report requests.
//!
//! Fatal conditions (missing input, unresolved references) reject the
//! request before any computation. Partial upstream failures are handled at
//! the fetch layer by degrading the affected unit and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    /// A required request parameter was absent or empty.
    #[error("please provide a {0} value")]
    MissingParameter(&'static str),

    /// The requested agency does not exist upstream.
    #[error("no agency found for id {0}")]
    AgencyNotFound(i64),

    /// An upstream call failed in a way that cannot be degraded.
    #[error("upstream request failed: {context}")]
    Upstream {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ReportError {
    pub fn upstream(context: impl Into<String>, source: anyhow::Error) -> Self {
        ReportError::Upstream {
            context: context.into(),
            source,
        }
    }
}
