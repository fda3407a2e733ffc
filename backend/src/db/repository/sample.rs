//! Sample repository trait.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{HeartRate, NewSample, Sample, SampleId, Scope, TimeWindow};

/// Repository trait for heart-rate samples.
///
/// Owner filters take `Option<&Scope>`: `None` means "any owner", which is how
/// samples recorded without an owner stay reachable.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait SampleRepository: Send + Sync {
    /// Store a new sample. The store assigns the id and `created_at`.
    async fn insert_sample(&self, sample: &NewSample) -> RepositoryResult<Sample>;

    /// Replace the BPM triple of an existing sample.
    ///
    /// # Returns
    /// * `Ok(Some(Sample))` - the updated sample
    /// * `Ok(None)` - no sample with that id
    async fn update_sample(
        &self,
        id: SampleId,
        heart_rate: HeartRate,
    ) -> RepositoryResult<Option<Sample>>;

    /// Delete a sample. Returns `true` when a sample was removed.
    async fn delete_sample(&self, id: SampleId) -> RepositoryResult<bool>;

    /// Fetch one sample by id.
    async fn get_sample(&self, id: SampleId) -> RepositoryResult<Option<Sample>>;

    /// Most recent sample (by `created_at`, ties broken by id) for an owner.
    async fn find_latest(&self, owner: Option<&Scope>) -> RepositoryResult<Option<Sample>>;

    /// Samples for an owner inside `window`, ordered by ascending `created_at`.
    async fn query_samples(
        &self,
        owner: Option<&Scope>,
        window: &TimeWindow,
    ) -> RepositoryResult<Vec<Sample>>;

    /// Check store connectivity.
    async fn health_check(&self) -> RepositoryResult<bool>;
}
