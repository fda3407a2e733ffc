use super::repositories::LocalRepository;
use super::services::*;
use crate::models::{HeartRate, NewSample, SampleId, Scope};

#[tokio::test]
async fn test_store_and_fetch_latest() {
    let repo = LocalRepository::new();
    store_sample(&repo, &NewSample::owned_by("u1", 120, 90, 60))
        .await
        .unwrap();
    let stored = store_sample(&repo, &NewSample::owned_by("u1", 130, 95, 65))
        .await
        .unwrap();

    let latest = latest_sample(&repo, Some(&Scope::new("u1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, stored.id);
}

#[tokio::test]
async fn test_unordered_triple_is_stored_unchanged() {
    let repo = LocalRepository::new();
    let stored = store_sample(&repo, &NewSample::owned_by("u1", 50, 90, 120))
        .await
        .unwrap();
    assert_eq!(stored.heart_rate, HeartRate::new(50, 90, 120));
}

#[tokio::test]
async fn test_update_missing_sample_is_not_found() {
    let repo = LocalRepository::new();
    let err = update_sample(&repo, SampleId::new(99), HeartRate::new(1, 1, 1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_twice_reports_not_found() {
    let repo = LocalRepository::new();
    let stored = store_sample(&repo, &NewSample::owned_by("u1", 100, 80, 60))
        .await
        .unwrap();
    delete_sample(&repo, stored.id).await.unwrap();
    assert!(delete_sample(&repo, stored.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_health_check_follows_store() {
    let repo = LocalRepository::new();
    assert!(health_check(&repo).await.unwrap());
    repo.set_healthy(false);
    assert!(!health_check(&repo).await.unwrap());
}
