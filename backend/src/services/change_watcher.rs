//! Change watcher: turns the store's change feed into [`ChangeEvent`]s.
//!
//! ```text
//!   ChangeFeed::subscribe ──► raw records ──► normalize ──► on_event(ChangeEvent)
//!                                  │
//!                                  └─ stream error ──► SubscriptionEnd::FeedLost
//! ```
//!
//! [`ChangeWatcher::watch`] runs a single subscription until the feed fails
//! or it is cancelled. [`spawn_supervised`] wraps it in a task that
//! resubscribes with bounded backoff and is the only long-lived watcher in
//! the process.

use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::PipelineError;
use crate::config::BackoffConfig;
use crate::db::repository::FullRepository;
use crate::models::{ChangeEvent, RawChange, Sample};

/// Normalizes raw feed records and runs feed subscriptions.
#[derive(Clone)]
pub struct ChangeWatcher {
    repository: Arc<dyn FullRepository>,
}

/// Why a subscription stopped.
#[derive(Debug)]
pub enum SubscriptionEnd {
    /// Cancelled by its owner.
    Shutdown,
    /// The feed reported a connection error.
    FeedLost(PipelineError),
    /// The feed ended without an error.
    FeedClosed,
    /// The subscription task panicked or was aborted.
    Aborted(String),
}

/// Handle to one running feed subscription.
///
/// Dropping it cancels the subscription.
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<SubscriptionEnd>>,
}

impl Subscription {
    /// Wait for the subscription to stop on its own.
    ///
    /// Returns `Shutdown` if the end was already observed.
    pub async fn closed(&mut self) -> SubscriptionEnd {
        let Some(task) = self.task.as_mut() else {
            return SubscriptionEnd::Shutdown;
        };
        let end = match task.await {
            Ok(end) => end,
            Err(e) => SubscriptionEnd::Aborted(e.to_string()),
        };
        self.task = None;
        end
    }

    /// Ask the subscription to stop without waiting.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the subscription and wait for its task.
    pub async fn shutdown(mut self) -> SubscriptionEnd {
        self.cancel();
        self.closed().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl ChangeWatcher {
    pub fn new(repository: Arc<dyn FullRepository>) -> Self {
        Self { repository }
    }

    /// Convert one raw record into the events subscribers should see.
    ///
    /// - insert: one `insert` event, or `MalformedChangeRecord` when the
    ///   document cannot be resolved
    /// - update: one `update` event, or nothing when the document is gone
    /// - delete: a `delete` event followed by a `latest` event carrying the
    ///   owner's most recent remaining sample (empty when none remain). A
    ///   delete with no known owner emits only the `delete`, since any
    ///   global lookup would surface another user's reading.
    pub async fn normalize(&self, raw: RawChange) -> Result<Vec<ChangeEvent>, PipelineError> {
        log::debug!(
            "Received {} change for document {:?}",
            raw.operation_type,
            raw.document_key
        );

        match raw.operation_type.as_str() {
            RawChange::INSERT => {
                let sample = self.resolve(&raw).await?.ok_or_else(|| {
                    PipelineError::malformed(&raw.operation_type, "document could not be resolved")
                })?;
                Ok(vec![ChangeEvent::inserted(&sample)])
            }
            RawChange::UPDATE => match self.resolve(&raw).await? {
                Some(sample) => Ok(vec![ChangeEvent::updated(&sample)]),
                None => {
                    log::debug!(
                        "Dropping update for {:?}: document no longer exists",
                        raw.document_key
                    );
                    Ok(Vec::new())
                }
            },
            RawChange::DELETE => {
                let id = raw.document_key.ok_or_else(|| {
                    PipelineError::malformed(&raw.operation_type, "missing document key")
                })?;
                let Some(scope) = raw.owner_hint else {
                    log::debug!(
                        "Delete of {} has no owner; broadcasting delete without latest",
                        id
                    );
                    return Ok(vec![ChangeEvent::deleted(id, None)]);
                };

                let mut events = vec![ChangeEvent::deleted(id, Some(scope.clone()))];
                match self.repository.find_latest(Some(&scope)).await {
                    Ok(latest) => {
                        events.push(ChangeEvent::latest(Some(scope), latest.as_ref()))
                    }
                    Err(e) => log::warn!(
                        "Skipping latest after delete of {}: lookup failed: {}",
                        id,
                        e
                    ),
                }
                Ok(events)
            }
            other => Err(PipelineError::malformed(other, "unsupported operation type")),
        }
    }

    /// The record's full document, looked up by key when the feed omitted it.
    async fn resolve(&self, raw: &RawChange) -> Result<Option<Sample>, PipelineError> {
        if let Some(ref document) = raw.full_document {
            return Ok(Some(document.clone()));
        }
        let id = raw.document_key.ok_or_else(|| {
            PipelineError::malformed(&raw.operation_type, "missing document and document key")
        })?;
        self.repository.get_sample(id).await.map_err(|e| {
            PipelineError::malformed(
                &raw.operation_type,
                format!("lookup of document {} failed: {}", id, e),
            )
        })
    }

    /// Open a feed subscription and deliver every normalized event to
    /// `on_event`, in feed order.
    ///
    /// Fails with `FeedConnectionLost` when the feed cannot be opened.
    /// Malformed records are logged and skipped; they never end the
    /// subscription.
    pub async fn watch<F>(&self, on_event: F) -> Result<Subscription, PipelineError>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let mut stream = self
            .repository
            .subscribe()
            .await
            .map_err(PipelineError::FeedConnectionLost)?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let watcher = self.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => return SubscriptionEnd::Shutdown,
                    item = stream.next() => match item {
                        Some(Ok(raw)) => match watcher.normalize(raw).await {
                            Ok(events) => events.into_iter().for_each(&on_event),
                            Err(e) => log::warn!("Dropping change record: {}", e),
                        },
                        Some(Err(e)) => {
                            log::warn!("Change feed connection lost: {}", e);
                            return SubscriptionEnd::FeedLost(PipelineError::FeedConnectionLost(e));
                        }
                        None => {
                            log::warn!("Change feed closed");
                            return SubscriptionEnd::FeedClosed;
                        }
                    },
                }
            }
        });

        Ok(Subscription {
            shutdown,
            task: Some(task),
        })
    }
}

/// Non-decreasing, capped delay sequence for resubscribe attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay().min(config.max_delay());
        Self { config, current }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .saturating_mul(self.config.multiplier.max(1))
            .min(self.config.max_delay());
        delay
    }

    /// Start over after a successful resubscribe.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay().min(self.config.max_delay());
    }
}

/// Handle to the supervised watcher task.
pub struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    reconnects: Arc<AtomicU64>,
}

impl WatcherHandle {
    /// Number of successful resubscribes since start.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the current subscription and stop resubscribing.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("Change watcher task ended abnormally: {}", e);
        }
    }
}

/// Start the process-wide watcher.
///
/// The first subscription is opened before this returns; failing to open it
/// is reported as `InitialSubscriptionFailed`. Later feed losses are retried
/// forever with `backoff`.
pub async fn spawn_supervised<F>(
    watcher: ChangeWatcher,
    backoff: BackoffConfig,
    on_event: F,
) -> Result<WatcherHandle, PipelineError>
where
    F: Fn(ChangeEvent) + Send + Sync + 'static,
{
    let on_event = Arc::new(on_event);
    let sink = {
        let on_event = on_event.clone();
        move |event: ChangeEvent| on_event(event)
    };
    let first = watcher.watch(sink).await.map_err(|e| match e {
        PipelineError::FeedConnectionLost(inner) => PipelineError::InitialSubscriptionFailed(inner),
        other => other,
    })?;
    log::info!("Change watcher subscribed");

    let (shutdown, shutdown_rx) = watch::channel(false);
    let reconnects = Arc::new(AtomicU64::new(0));
    let task = tokio::spawn(supervise(
        watcher,
        on_event,
        first,
        Backoff::new(backoff),
        shutdown_rx,
        reconnects.clone(),
    ));

    Ok(WatcherHandle {
        shutdown,
        task,
        reconnects,
    })
}

async fn supervise<F>(
    watcher: ChangeWatcher,
    on_event: Arc<F>,
    first: Subscription,
    mut backoff: Backoff,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnects: Arc<AtomicU64>,
) where
    F: Fn(ChangeEvent) + Send + Sync + 'static,
{
    let mut current = first;
    loop {
        let ended = tokio::select! {
            end = current.closed() => Some(end),
            _ = shutdown_rx.changed() => None,
        };
        let Some(end) = ended else {
            current.shutdown().await;
            log::info!("Change watcher stopped");
            return;
        };

        match end {
            SubscriptionEnd::Shutdown => return,
            SubscriptionEnd::FeedLost(e) => log::warn!("Watcher subscription dropped: {}", e),
            SubscriptionEnd::FeedClosed => log::warn!("Watcher subscription closed by feed"),
            SubscriptionEnd::Aborted(reason) => {
                log::error!("Watcher subscription aborted: {}", reason)
            }
        }

        let mut attempt = 0u32;
        current = loop {
            attempt += 1;
            let delay = backoff.next_delay();
            log::info!(
                "Resubscribing to change feed in {:?} (attempt {})",
                delay,
                attempt
            );
            let stop = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = shutdown_rx.changed() => true,
            };
            if stop {
                log::info!("Change watcher stopped while reconnecting");
                return;
            }

            let sink = {
                let on_event = on_event.clone();
                move |event: ChangeEvent| on_event(event)
            };
            match watcher.watch(sink).await {
                Ok(subscription) => {
                    reconnects.fetch_add(1, Ordering::Relaxed);
                    backoff.reset();
                    log::info!("Change watcher resubscribed after {} attempt(s)", attempt);
                    break subscription;
                }
                Err(e) => log::warn!("Resubscribe attempt {} failed: {}", attempt, e),
            }
        };
    }
}
