//! Tests for repository errors and the in-memory store's change feed.

use futures::StreamExt;
use std::time::Duration;

use heartify_rust::db::repository::{
    ChangeFeed, ErrorContext, RepositoryError, SampleRepository,
};
use heartify_rust::db::{services, LocalRepository};
use heartify_rust::models::{HeartRate, NewSample, RawChange, SampleId, Scope, TimeWindow};

#[test]
fn test_error_context_chaining() {
    let ctx = ErrorContext::new("delete_sample")
        .with_entity("sample")
        .with_entity_id(42)
        .with_details("row locked")
        .retryable();

    assert_eq!(ctx.operation.as_deref(), Some("delete_sample"));
    assert_eq!(ctx.entity_id.as_deref(), Some("42"));
    assert_eq!(
        ctx.to_string(),
        "[operation=delete_sample, entity=sample, id=42, details=row locked, retryable=true]"
    );
}

#[test]
fn test_error_classification() {
    let down = RepositoryError::connection_with_context(
        "store down",
        ErrorContext::new("get_connection"),
    );
    assert!(down.is_retryable());
    assert!(!RepositoryError::query("bad sql").is_retryable());
    assert!(!RepositoryError::internal("corrupt row").is_retryable());

    let lost = RepositoryError::feed_lost("stream closed", ErrorContext::new("recv"));
    assert!(lost.is_retryable());
    assert!(!lost.is_not_found());
    assert_eq!(lost.context().entity.as_deref(), Some("change_feed"));
    assert!(lost.to_string().starts_with("Change feed error: stream closed"));

    let not_found = RepositoryError::sample_not_found(SampleId::new(7), "update_sample");
    assert!(not_found.is_not_found());
    assert!(!not_found.is_retryable());
    assert_eq!(not_found.context().operation.as_deref(), Some("update_sample"));
    assert_eq!(not_found.context().entity_id.as_deref(), Some("7"));
    assert!(not_found.to_string().contains("Sample 7 not found"));
}

#[tokio::test]
async fn test_services_report_missing_samples() {
    let repo = LocalRepository::new();
    let err = services::delete_sample(&repo, SampleId::new(99)).await.unwrap_err();
    assert!(err.is_not_found());

    let err = services::update_sample(&repo, SampleId::new(99), HeartRate::new(1, 1, 1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unhealthy_store_fails_with_retryable_errors() {
    let repo = LocalRepository::new();
    repo.set_healthy(false);

    let err = repo
        .insert_sample(&NewSample::owned_by("u1", 90, 70, 60))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.context().operation.as_deref(), Some("insert_sample"));
    assert!(!repo.health_check().await.unwrap());
}

#[tokio::test]
async fn test_query_filters_by_owner_and_window() {
    let repo = LocalRepository::new();
    let now = chrono::Utc::now();
    repo.insert_with_timestamp(NewSample::owned_by("u1", 90, 70, 60), now);
    repo.insert_with_timestamp(NewSample::owned_by("u2", 95, 75, 65), now);
    repo.insert_with_timestamp(
        NewSample::owned_by("u1", 99, 79, 69),
        now - chrono::Duration::days(3),
    );

    let window = TimeWindow::day_of(now);
    let mine = repo
        .query_samples(Some(&Scope::new("u1")), &window)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].max_bpm(), 90);

    let everyone = repo.query_samples(None, &window).await.unwrap();
    assert_eq!(everyone.len(), 2);
}

#[tokio::test]
async fn test_each_subscription_sees_changes_from_subscribe_time() {
    let repo = LocalRepository::new();
    repo.insert_sample(&NewSample::owned_by("u1", 90, 70, 60))
        .await
        .unwrap();

    let mut feed = repo.subscribe().await.unwrap();
    let sample = repo
        .insert_sample(&NewSample::owned_by("u1", 91, 71, 61))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.operation_type, RawChange::INSERT);
    assert_eq!(first.full_document.unwrap().id, sample.id);
}

#[tokio::test]
async fn test_lagging_subscriber_loses_its_stream() {
    let repo = LocalRepository::with_feed_capacity(2);
    let mut feed = repo.subscribe().await.unwrap();
    for i in 0..5 {
        repo.insert_with_timestamp(NewSample::owned_by("u1", 90 + i, 70, 60), chrono::Utc::now());
    }

    let item = feed.next().await.unwrap();
    let err = item.unwrap_err();
    assert!(err.is_retryable());
    assert!(feed.next().await.is_none());
}

#[tokio::test]
async fn test_disconnect_ends_stream_with_error() {
    let repo = LocalRepository::new();
    let mut feed = repo.subscribe().await.unwrap();
    repo.disconnect_feed();

    let err = feed.next().await.unwrap().unwrap_err();
    assert_eq!(err.context().entity.as_deref(), Some("change_feed"));
    assert!(err.is_retryable());
    assert!(feed.next().await.is_none());
    drop(feed);
    assert_eq!(repo.subscriber_count(), 0);
}
