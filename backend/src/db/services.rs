//! Store-level operations used by the HTTP layer and tests.
//!
//! These work with any [`SampleRepository`] and turn "no such sample" into a
//! `NotFound` error so callers can map it straight to a 404.

use crate::db::repository::{RepositoryError, RepositoryResult, SampleRepository};
use crate::models::{HeartRate, NewSample, Sample, SampleId, Scope};

/// Store a new reading.
///
/// Triples that violate `min ≤ avg ≤ max` are stored as-is but logged.
pub async fn store_sample<R>(repo: &R, sample: &NewSample) -> RepositoryResult<Sample>
where
    R: SampleRepository + ?Sized,
{
    if !sample.heart_rate.is_ordered() {
        log::warn!(
            "Storing unordered heart-rate triple max={} avg={} min={} for {:?}",
            sample.heart_rate.max_bpm,
            sample.heart_rate.avg_bpm,
            sample.heart_rate.min_bpm,
            sample.owner
        );
    }
    let stored = repo.insert_sample(sample).await?;
    log::debug!("Stored sample {} for {:?}", stored.id, stored.owner);
    Ok(stored)
}

/// Replace the BPM triple of an existing sample.
pub async fn update_sample<R>(
    repo: &R,
    id: SampleId,
    heart_rate: HeartRate,
) -> RepositoryResult<Sample>
where
    R: SampleRepository + ?Sized,
{
    repo.update_sample(id, heart_rate)
        .await?
        .ok_or_else(|| RepositoryError::sample_not_found(id, "update_sample"))
}

/// Delete a sample by id.
pub async fn delete_sample<R>(repo: &R, id: SampleId) -> RepositoryResult<()>
where
    R: SampleRepository + ?Sized,
{
    if repo.delete_sample(id).await? {
        log::debug!("Deleted sample {}", id);
        Ok(())
    } else {
        Err(RepositoryError::sample_not_found(id, "delete_sample"))
    }
}

/// Most recent sample for `owner` (any owner when `None`).
pub async fn latest_sample<R>(repo: &R, owner: Option<&Scope>) -> RepositoryResult<Option<Sample>>
where
    R: SampleRepository + ?Sized,
{
    repo.find_latest(owner).await
}

/// Check store connectivity.
pub async fn health_check<R>(repo: &R) -> RepositoryResult<bool>
where
    R: SampleRepository + ?Sized,
{
    repo.health_check().await
}
