//! In-memory repository for unit tests and local development.
//!
//! Samples live in a map behind a `parking_lot::RwLock`. Every mutation is
//! published on an in-process change log (a `tokio::sync::broadcast` channel)
//! while the write lock is still held, so feed order always matches commit
//! order.
//!
//! The feed can be broken on purpose: [`LocalRepository::set_feed_available`]
//! makes `subscribe` fail and [`LocalRepository::disconnect_feed`] terminates
//! every open stream with a feed error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::db::repository::{
    ChangeFeed, ChangeStream, ErrorContext, RepositoryError, RepositoryResult, SampleRepository,
};
use crate::models::{HeartRate, NewSample, RawChange, Sample, SampleId, Scope, TimeWindow};

const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum FeedSignal {
    Change(RawChange),
    Disconnect,
}

#[derive(Debug, Default)]
struct LocalData {
    samples: HashMap<SampleId, Sample>,
    next_id: i64,
}

/// In-memory sample store with a live change feed.
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
    feed: broadcast::Sender<FeedSignal>,
    feed_available: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    delete_pre_images: Arc<AtomicBool>,
}

impl std::fmt::Debug for LocalRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRepository")
            .field("samples", &self.data.read().samples.len())
            .field("subscribers", &self.feed.receiver_count())
            .finish()
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRepository {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a repository whose change log buffers at most `capacity`
    /// undelivered records per subscriber. A subscriber that falls further
    /// behind loses its stream.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            data: Arc::new(RwLock::new(LocalData {
                samples: HashMap::new(),
                next_id: 1,
            })),
            feed,
            feed_available: Arc::new(AtomicBool::new(true)),
            healthy: Arc::new(AtomicBool::new(true)),
            delete_pre_images: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the store as reachable or not. While unhealthy every query fails
    /// with a feed error.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// When `false`, `subscribe` fails with a feed error.
    pub fn set_feed_available(&self, available: bool) {
        self.feed_available.store(available, Ordering::SeqCst);
    }

    /// When `false`, delete records carry no owner hint.
    pub fn set_delete_pre_images(&self, enabled: bool) {
        self.delete_pre_images.store(enabled, Ordering::SeqCst);
    }

    /// Terminate every open change stream with a feed error.
    pub fn disconnect_feed(&self) {
        let _ = self.feed.send(FeedSignal::Disconnect);
    }

    /// Push a raw record onto the feed without touching stored data.
    pub fn inject_change(&self, change: RawChange) {
        let _ = self.feed.send(FeedSignal::Change(change));
    }

    /// Number of open change streams.
    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    pub fn sample_count(&self) -> usize {
        self.data.read().samples.len()
    }

    /// Insert a sample with an explicit creation time.
    pub fn insert_with_timestamp(&self, sample: NewSample, created_at: DateTime<Utc>) -> Sample {
        let mut data = self.data.write();
        let id = SampleId::new(data.next_id);
        data.next_id += 1;

        let stored = Sample {
            id,
            owner: sample.owner,
            heart_rate: sample.heart_rate,
            created_at,
        };
        data.samples.insert(id, stored.clone());
        self.publish(RawChange::insert(stored.clone()));
        stored
    }

    /// Remove all samples without emitting changes.
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.samples.clear();
        data.next_id = 1;
    }

    fn publish(&self, change: RawChange) {
        // No receivers is not an error; nobody is watching yet.
        let _ = self.feed.send(FeedSignal::Change(change));
    }

    fn ensure_healthy(&self, operation: &str) -> RepositoryResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::connection_with_context(
                "local store unavailable",
                ErrorContext::new(operation).with_entity("sample"),
            ))
        }
    }
}

#[async_trait]
impl SampleRepository for LocalRepository {
    async fn insert_sample(&self, sample: &NewSample) -> RepositoryResult<Sample> {
        self.ensure_healthy("insert_sample")?;
        Ok(self.insert_with_timestamp(sample.clone(), Utc::now()))
    }

    async fn update_sample(
        &self,
        id: SampleId,
        heart_rate: HeartRate,
    ) -> RepositoryResult<Option<Sample>> {
        self.ensure_healthy("update_sample")?;
        let mut data = self.data.write();
        let Some(stored) = data.samples.get_mut(&id) else {
            return Ok(None);
        };
        stored.heart_rate = heart_rate;
        let updated = stored.clone();
        self.publish(RawChange::update(id, Some(updated.clone())));
        Ok(Some(updated))
    }

    async fn delete_sample(&self, id: SampleId) -> RepositoryResult<bool> {
        self.ensure_healthy("delete_sample")?;
        let mut data = self.data.write();
        match data.samples.remove(&id) {
            Some(removed) => {
                let owner_hint = if self.delete_pre_images.load(Ordering::SeqCst) {
                    removed.owner
                } else {
                    None
                };
                self.publish(RawChange::delete(id, owner_hint));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_sample(&self, id: SampleId) -> RepositoryResult<Option<Sample>> {
        self.ensure_healthy("get_sample")?;
        Ok(self.data.read().samples.get(&id).cloned())
    }

    async fn find_latest(&self, owner: Option<&Scope>) -> RepositoryResult<Option<Sample>> {
        self.ensure_healthy("find_latest")?;
        let data = self.data.read();
        Ok(data
            .samples
            .values()
            .filter(|s| s.belongs_to(owner))
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn query_samples(
        &self,
        owner: Option<&Scope>,
        window: &TimeWindow,
    ) -> RepositoryResult<Vec<Sample>> {
        self.ensure_healthy("query_samples")?;
        let data = self.data.read();
        let mut samples: Vec<Sample> = data
            .samples
            .values()
            .filter(|s| s.belongs_to(owner) && window.contains(s.created_at))
            .cloned()
            .collect();
        samples.sort_by_key(|s| (s.created_at, s.id));
        Ok(samples)
    }

    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ChangeFeed for LocalRepository {
    async fn subscribe(&self) -> RepositoryResult<ChangeStream> {
        if !self.feed_available.load(Ordering::SeqCst) {
            return Err(RepositoryError::feed_lost(
                "change feed unavailable",
                ErrorContext::new("subscribe"),
            ));
        }

        let mut rx = self.feed.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(FeedSignal::Change(change)) => yield Ok(change),
                    Ok(FeedSignal::Disconnect) => {
                        yield Err(RepositoryError::feed_lost(
                            "change feed disconnected",
                            ErrorContext::new("recv"),
                        ));
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        yield Err(RepositoryError::feed_lost(
                            "change feed subscriber fell behind",
                            ErrorContext::new("recv").with_details(format!("skipped={}", skipped)),
                        ));
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let repo = LocalRepository::new();
        let a = repo
            .insert_sample(&NewSample::owned_by("u1", 90, 70, 60))
            .await
            .unwrap();
        let b = repo
            .insert_sample(&NewSample::owned_by("u1", 91, 71, 61))
            .await
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(repo.sample_count(), 2);
    }

    #[tokio::test]
    async fn test_feed_reports_mutations_in_order() {
        let repo = LocalRepository::new();
        let mut feed = repo.subscribe().await.unwrap();

        let sample = repo
            .insert_sample(&NewSample::owned_by("u1", 90, 70, 60))
            .await
            .unwrap();
        repo.update_sample(sample.id, HeartRate::new(100, 80, 60))
            .await
            .unwrap();
        repo.delete_sample(sample.id).await.unwrap();

        let ops: Vec<String> = feed
            .by_ref()
            .take(3)
            .map(|c| c.unwrap().operation_type)
            .collect()
            .await;
        assert_eq!(ops, vec!["insert", "update", "delete"]);
    }

    #[tokio::test]
    async fn test_delete_hint_can_be_disabled() {
        let repo = LocalRepository::new();
        let sample = repo
            .insert_sample(&NewSample::owned_by("u1", 90, 70, 60))
            .await
            .unwrap();
        repo.set_delete_pre_images(false);
        let mut feed = repo.subscribe().await.unwrap();
        repo.delete_sample(sample.id).await.unwrap();

        let change = feed.next().await.unwrap().unwrap();
        assert_eq!(change.document_key, Some(sample.id));
        assert!(change.owner_hint.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_with_error() {
        let repo = LocalRepository::new();
        let mut feed = repo.subscribe().await.unwrap();
        repo.disconnect_feed();

        let err = feed.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_feed_rejects_subscribe() {
        let repo = LocalRepository::new();
        repo.set_feed_available(false);
        assert!(repo.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_latest_and_range_queries_respect_owner() {
        let repo = LocalRepository::new();
        let t = |h| Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap();
        repo.insert_with_timestamp(NewSample::owned_by("a", 80, 70, 60), t(8));
        repo.insert_with_timestamp(NewSample::owned_by("b", 99, 99, 99), t(10));
        repo.insert_with_timestamp(NewSample::owned_by("a", 85, 72, 61), t(9));

        let latest = repo
            .find_latest(Some(&Scope::new("a")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.max_bpm(), 85);

        let window = TimeWindow::half_open(t(0), t(23));
        let rows = repo
            .query_samples(Some(&Scope::new("a")), &window)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at < rows[1].created_at);
    }

    #[tokio::test]
    async fn test_unhealthy_store_fails_queries() {
        let repo = LocalRepository::new();
        repo.set_healthy(false);
        assert!(!repo.health_check().await.unwrap());
        assert!(repo.find_latest(None).await.is_err());
    }
}
