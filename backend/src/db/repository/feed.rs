//! Change feed trait.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::RepositoryResult;
use crate::models::RawChange;

/// Stream of raw change records.
///
/// An `Err` item means the feed connection was lost; the stream yields nothing
/// after it and the consumer must call [`ChangeFeed::subscribe`] again.
pub type ChangeStream = BoxStream<'static, RepositoryResult<RawChange>>;

/// A live, ordered stream of store mutations.
///
/// `subscribe` starts from "now" (no replay of history) and may be called any
/// number of times; every call yields an independent stream, so resubscribing
/// after a failure is always safe.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self) -> RepositoryResult<ChangeStream>;
}
