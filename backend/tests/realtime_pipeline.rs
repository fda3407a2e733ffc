//! End-to-end tests: store change feed → change watcher → broadcast hub →
//! subscriber state.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use heartify_rust::config::BackoffConfig;
use heartify_rust::db::repository::{FullRepository, SampleRepository};
use heartify_rust::db::LocalRepository;
use heartify_rust::models::{
    ChangeOperation, ChangePayload, NewSample, RawChange, SampleId, Scope, WireChange,
};
use heartify_rust::services::{
    spawn_supervised, BroadcastHub, ChangeWatcher, ClientMerge, HubConfig, HubMessage,
    PipelineError, WatcherHandle,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        multiplier: 2,
    }
}

fn scoped_hub() -> BroadcastHub {
    BroadcastHub::new(HubConfig {
        queue_capacity: 64,
        legacy_broadcast: false,
    })
}

async fn start(repo: &LocalRepository, hub: &BroadcastHub) -> WatcherHandle {
    let repository = Arc::new(repo.clone()) as Arc<dyn FullRepository>;
    let hub = hub.clone();
    spawn_supervised(ChangeWatcher::new(repository), fast_backoff(), move |event| {
        hub.publish(&event);
    })
    .await
    .expect("watcher should subscribe")
}

async fn recv(rx: &mut mpsc::Receiver<HubMessage>) -> HubMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a change")
        .expect("hub closed the connection")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<HubMessage>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected message: {:?}", extra);
}

#[tokio::test]
async fn test_delete_emits_delete_then_latest_remaining() {
    let repo = LocalRepository::new();
    let hub = scoped_hub();
    let watcher = start(&repo, &hub).await;
    let (id, mut rx) = hub.connect();
    hub.join(id, Scope::new("u1"));

    let first = repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    let second = repo.insert_with_timestamp(
        NewSample::owned_by("u1", 90, 75, 65),
        t0() + ChronoDuration::days(1),
    );
    assert_eq!(recv(&mut rx).await.event.document_id(), Some(first.id));
    assert_eq!(recv(&mut rx).await.event.document_id(), Some(second.id));

    assert!(repo.delete_sample(second.id).await.unwrap());

    let delete = recv(&mut rx).await;
    assert_eq!(&*delete.channel, "changeUpdate:u1");
    assert_eq!(delete.event.operation, ChangeOperation::Delete);
    assert_eq!(delete.event.payload, ChangePayload::Deleted(second.id));

    let latest = recv(&mut rx).await;
    assert_eq!(latest.event.operation, ChangeOperation::Latest);
    let reading = latest.event.reading().expect("latest should carry a reading");
    assert_eq!(reading.id, first.id);
    assert_eq!(reading.timestamp, t0());

    assert_quiet(&mut rx).await;
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_deleting_last_sample_emits_one_empty_latest() {
    let repo = LocalRepository::new();
    let hub = scoped_hub();
    let watcher = start(&repo, &hub).await;
    let (id, mut rx) = hub.connect();
    hub.join(id, Scope::new("u1"));

    let only = repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    // Another owner's sample must not leak into u1's latest.
    repo.insert_with_timestamp(NewSample::owned_by("u2", 99, 90, 80), t0());
    recv(&mut rx).await;

    repo.delete_sample(only.id).await.unwrap();
    assert_eq!(recv(&mut rx).await.event.operation, ChangeOperation::Delete);

    let latest = recv(&mut rx).await;
    assert_eq!(latest.event.operation, ChangeOperation::Latest);
    assert_eq!(latest.event.payload, ChangePayload::Empty);

    let wire = WireChange::from(latest.event.as_ref());
    assert_eq!(
        serde_json::to_value(&wire).unwrap(),
        serde_json::json!({"operation": "latest"})
    );

    assert_quiet(&mut rx).await;
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_delete_without_owner_reaches_every_room() {
    let repo = LocalRepository::new();
    repo.set_delete_pre_images(false);
    let hub = scoped_hub();
    let watcher = start(&repo, &hub).await;
    let (a, mut a_rx) = hub.connect();
    let (b, mut b_rx) = hub.connect();
    hub.join(a, Scope::new("u1"));
    hub.join(b, Scope::new("u2"));

    let newest_u1 = repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    repo.insert_with_timestamp(
        NewSample::owned_by("u1", 85, 72, 61),
        t0() - ChronoDuration::hours(1),
    );
    repo.insert_with_timestamp(
        NewSample::owned_by("u2", 140, 110, 70),
        t0() + ChronoDuration::hours(1),
    );
    recv(&mut a_rx).await;
    recv(&mut a_rx).await;
    recv(&mut b_rx).await;

    repo.delete_sample(newest_u1.id).await.unwrap();

    let on_a = recv(&mut a_rx).await;
    assert_eq!(&*on_a.channel, "changeUpdate:u1");
    assert_eq!(on_a.event.payload, ChangePayload::Deleted(newest_u1.id));
    let on_b = recv(&mut b_rx).await;
    assert_eq!(&*on_b.channel, "changeUpdate:u2");
    assert_eq!(on_b.event.payload, ChangePayload::Deleted(newest_u1.id));

    // Without an owner there is no safe latest; u2's reading must not reach u1.
    assert_quiet(&mut a_rx).await;
    assert_quiet(&mut b_rx).await;
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_same_scope_connections_see_same_order() {
    let repo = LocalRepository::new();
    let hub = scoped_hub();
    let watcher = start(&repo, &hub).await;
    let (a, mut a_rx) = hub.connect();
    let (b, mut b_rx) = hub.connect();
    hub.join(a, Scope::new("u1"));
    hub.join(b, Scope::new("u1"));

    let mut expected = Vec::new();
    for i in 0..5 {
        let sample = repo.insert_with_timestamp(
            NewSample::owned_by("u1", 100 + i, 80, 60),
            t0() + ChronoDuration::minutes(i as i64),
        );
        expected.push(sample.id);
    }

    for rx in [&mut a_rx, &mut b_rx] {
        let mut seen = Vec::new();
        for _ in 0..expected.len() {
            seen.push(recv(&mut *rx).await.event.document_id().unwrap());
        }
        assert_eq!(seen, expected);
    }
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_publish_to_unjoined_scope_reaches_nobody() {
    let repo = LocalRepository::new();
    let hub = scoped_hub();
    let watcher = start(&repo, &hub).await;
    let (id, mut rx) = hub.connect();
    hub.join(id, Scope::new("u2"));

    repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    assert_quiet(&mut rx).await;
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_legacy_channel_reaches_unjoined_connections() {
    let repo = LocalRepository::new();
    let hub = BroadcastHub::default();
    let watcher = start(&repo, &hub).await;
    let (_id, mut rx) = hub.connect();

    repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    let message = recv(&mut rx).await;
    assert_eq!(&*message.channel, "changeUpdate");
    assert_eq!(message.event.operation, ChangeOperation::Insert);
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let repo = LocalRepository::new();
    let hub = BroadcastHub::default();
    let watcher = start(&repo, &hub).await;
    let (_id, mut rx) = hub.connect();

    repo.inject_change(RawChange {
        operation_type: "replace".to_string(),
        full_document: None,
        document_key: Some(SampleId::new(1)),
        owner_hint: None,
    });
    repo.inject_change(RawChange::update(SampleId::new(404), None));
    let sample = repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());

    assert_eq!(recv(&mut rx).await.event.document_id(), Some(sample.id));
    assert_quiet(&mut rx).await;
    assert!(!watcher.is_finished());
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_feed_loss_is_recovered_by_resubscribing() {
    let repo = LocalRepository::new();
    let hub = BroadcastHub::default();
    let watcher = start(&repo, &hub).await;
    let (_id, mut rx) = hub.connect();

    repo.disconnect_feed();
    tokio::time::timeout(Duration::from_secs(2), async {
        while watcher.reconnect_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watcher should resubscribe");

    let sample = repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    assert_eq!(recv(&mut rx).await.event.document_id(), Some(sample.id));
    assert_eq!(repo.subscriber_count(), 1);

    watcher.shutdown().await;
    assert_eq!(repo.subscriber_count(), 0);
}

#[tokio::test]
async fn test_resubscribe_waits_while_feed_is_down() {
    let repo = LocalRepository::new();
    let hub = BroadcastHub::default();
    let watcher = start(&repo, &hub).await;

    repo.set_feed_available(false);
    repo.disconnect_feed();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(watcher.reconnect_count(), 0);
    assert!(!watcher.is_finished());

    repo.set_feed_available(true);
    tokio::time::timeout(Duration::from_secs(2), async {
        while watcher.reconnect_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watcher should resubscribe once the feed is back");
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_initial_subscription_failure_is_fatal() {
    let repo = LocalRepository::new();
    repo.set_feed_available(false);
    let repository = Arc::new(repo) as Arc<dyn FullRepository>;

    let err = spawn_supervised(ChangeWatcher::new(repository), fast_backoff(), |_| {})
        .await
        .err()
        .expect("startup should fail");
    assert!(matches!(err, PipelineError::InitialSubscriptionFailed(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_client_state_follows_the_stream() {
    let repo = LocalRepository::new();
    let hub = scoped_hub();
    let watcher = start(&repo, &hub).await;
    let (id, mut rx) = hub.connect();
    let scope = Scope::new("u1");
    hub.join(id, scope.clone());

    let now = t0() + ChronoDuration::hours(4);
    let mut client = ClientMerge::new(now, Duration::from_secs(30));
    let started = Instant::now();
    client.refresh_aggregates(&repo, Some(&scope), now, started).await.unwrap();
    assert!(client.weekly().is_empty());

    let first = repo.insert_with_timestamp(NewSample::owned_by("u1", 80, 70, 60), t0());
    let second = repo.insert_with_timestamp(
        NewSample::owned_by("u1", 90, 75, 65),
        t0() + ChronoDuration::hours(1),
    );
    for _ in 0..2 {
        let message = recv(&mut rx).await;
        let outcome = client.apply(&message.event, started + Duration::from_secs(1));
        assert!(outcome.daily_changed);
        assert!(!outcome.refresh_due);
    }
    assert_eq!(client.daily().len(), 2);

    repo.delete_sample(second.id).await.unwrap();
    for _ in 0..2 {
        let message = recv(&mut rx).await;
        client.apply(&message.event, started + Duration::from_secs(40));
    }
    assert_eq!(client.daily().len(), 1);
    assert_eq!(client.daily()[0].id, first.id);

    let refreshed = client
        .refresh_aggregates(&repo, Some(&scope), now, started + Duration::from_secs(40))
        .await
        .unwrap();
    assert!(refreshed);
    assert_eq!(client.weekly().len(), 1);
    assert_eq!(client.weekly()[0].max_bpm, 80);
    watcher.shutdown().await;
}
