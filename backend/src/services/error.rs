//! Errors raised by the change pipeline.

use crate::db::repository::RepositoryError;

/// Failure kinds of the change pipeline.
///
/// Only [`PipelineError::InitialSubscriptionFailed`] is fatal; everything else
/// is recovered from or dropped where it happens.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The change feed stream ended with an error. Recovered by resubscribing.
    #[error("Change feed connection lost: {0}")]
    FeedConnectionLost(#[source] RepositoryError),

    /// A raw change could not be normalized. Dropped and logged.
    #[error("Malformed change record ({operation_type}): {reason}")]
    MalformedChangeRecord {
        operation_type: String,
        reason: String,
    },

    /// A message could not be handed to one connection. Dropped for that
    /// connection only.
    #[error("Delivery to connection {connection} failed: {reason}")]
    DeliveryFailure { connection: String, reason: String },

    /// A store query behind an aggregated view failed.
    #[error("Aggregation query failed: {0}")]
    AggregationQueryFailure(#[source] RepositoryError),

    /// The change feed could not be opened at startup.
    #[error("Initial change feed subscription failed: {0}")]
    InitialSubscriptionFailed(#[source] RepositoryError),
}

impl PipelineError {
    pub fn malformed(operation_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedChangeRecord {
            operation_type: operation_type.into(),
            reason: reason.into(),
        }
    }

    /// Whether the process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InitialSubscriptionFailed(_))
    }
}
