//! Registry of live subscriber connections, grouped into per-user rooms.
//!
//! Each connection owns a bounded outbound queue. `publish` snapshots the
//! target queues under the registry lock, releases it, then hands every
//! message over with `try_send`: a full queue loses that message, a closed
//! queue gets its connection removed. Nothing in `publish` waits on a
//! subscriber.
//!
//! Channels:
//! - `changeUpdate:<scope>` for members of the event's room
//! - `changeUpdate` for every connection, when legacy broadcast is enabled
//!
//! An event without a scope goes to every joined connection on that
//! connection's own scoped channel.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::error::PipelineError;
use crate::config::RealtimeConfig;
use crate::models::{scoped_channel, ChangeEvent, Scope, LEGACY_CHANNEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound delivery.
#[derive(Debug, Clone)]
pub struct HubMessage {
    pub channel: Arc<str>,
    pub event: Arc<ChangeEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub legacy_broadcast: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            legacy_broadcast: true,
        }
    }
}

impl From<&RealtimeConfig> for HubConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            queue_capacity: config.connection_queue_capacity.max(1),
            legacy_broadcast: config.legacy_broadcast,
        }
    }
}

type Target = (ConnectionId, mpsc::Sender<HubMessage>, Arc<str>);

/// Outcome of one `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: usize,
}

struct ConnectionEntry {
    sender: mpsc::Sender<HubMessage>,
    scope: Option<Scope>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<Scope, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl HubState {
    fn remove_from_room(&mut self, id: ConnectionId, scope: &Scope) {
        if let Some(members) = self.rooms.get_mut(scope) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(scope);
            }
        }
    }
}

/// Shared handle to the connection registry. Clones refer to the same hub.
#[derive(Clone)]
pub struct BroadcastHub {
    state: Arc<Mutex<HubState>>,
    config: HubConfig,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BroadcastHub")
            .field("connections", &state.connections.len())
            .field("rooms", &state.rooms.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a connection. It receives legacy broadcasts until it joins a room.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<HubMessage>) {
        let id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        self.state
            .lock()
            .connections
            .insert(id, ConnectionEntry { sender, scope: None });
        log::info!("Connection {} registered", id);
        (id, receiver)
    }

    /// Register a connection that leaves the hub when the guard is dropped.
    pub fn connect_guarded(&self) -> (ConnectionGuard, mpsc::Receiver<HubMessage>) {
        let (id, receiver) = self.connect();
        (
            ConnectionGuard {
                hub: self.clone(),
                id,
            },
            receiver,
        )
    }

    /// Put a connection in `scope`'s room, leaving any previous room.
    ///
    /// Joining the current room again changes nothing. Returns `false` for an
    /// unknown connection.
    pub fn join(&self, id: ConnectionId, scope: Scope) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.connections.get_mut(&id) else {
            return false;
        };
        if entry.scope.as_ref() == Some(&scope) {
            return true;
        }

        let previous = entry.scope.replace(scope.clone());
        if let Some(ref previous) = previous {
            state.remove_from_room(id, previous);
        }
        state.rooms.entry(scope.clone()).or_default().insert(id);
        log::info!(
            "Connection {} joined room {} (previous: {:?})",
            id,
            scope,
            previous
        );
        true
    }

    /// Leave the current room but stay connected.
    pub fn leave_room(&self, id: ConnectionId) -> Option<Scope> {
        let mut state = self.state.lock();
        let scope = state.connections.get_mut(&id)?.scope.take()?;
        state.remove_from_room(id, &scope);
        log::info!("Connection {} left room {}", id, scope);
        Some(scope)
    }

    /// Remove a connection entirely. Unknown ids are ignored.
    pub fn leave(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.connections.remove(&id) {
            if let Some(ref scope) = entry.scope {
                state.remove_from_room(id, scope);
            }
            log::info!("Connection {} disconnected", id);
        }
    }

    pub fn room_size(&self, scope: &Scope) -> usize {
        self.state
            .lock()
            .rooms
            .get(scope)
            .map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn scope_of(&self, id: ConnectionId) -> Option<Scope> {
        self.state.lock().connections.get(&id)?.scope.clone()
    }

    /// Deliver `event` to every interested connection without waiting.
    pub fn publish(&self, event: &ChangeEvent) -> PublishReport {
        let event = Arc::new(event.clone());
        let targets = self.snapshot_targets(&event);

        let mut report = PublishReport::default();
        let mut closed = Vec::new();
        for (id, sender, channel) in targets {
            let message = HubMessage {
                channel,
                event: event.clone(),
            };
            match sender.try_send(message) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(message)) => {
                    report.dropped += 1;
                    log::debug!(
                        "{}",
                        PipelineError::DeliveryFailure {
                            connection: id.to_string(),
                            reason: format!("queue full, dropped {}", message.channel),
                        }
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut state = self.state.lock();
            for id in &closed {
                if let Some(entry) = state.connections.remove(id) {
                    if let Some(ref scope) = entry.scope {
                        state.remove_from_room(*id, scope);
                    }
                }
            }
            report.pruned = closed.len();
            log::debug!("Pruned {} closed connection(s)", closed.len());
        }
        if report.dropped > 0 {
            log::warn!(
                "{} {} event dropped for {} slow connection(s)",
                event.operation.as_str(),
                event
                    .scope
                    .as_ref()
                    .map_or_else(|| "broadcast".to_string(), |s| s.to_string()),
                report.dropped
            );
        }
        report
    }

    fn snapshot_targets(&self, event: &ChangeEvent) -> Vec<Target> {
        let state = self.state.lock();
        let mut targets: Vec<Target> = Vec::new();

        if self.config.legacy_broadcast {
            let legacy: Arc<str> = Arc::from(LEGACY_CHANNEL);
            targets.extend(
                state
                    .connections
                    .iter()
                    .map(|(id, entry)| (*id, entry.sender.clone(), legacy.clone())),
            );
        }

        match event.scope {
            Some(ref scope) => {
                let channel: Arc<str> = Arc::from(scoped_channel(scope));
                let members = state.rooms.get(scope).into_iter().flatten();
                targets.extend(members.filter_map(|id| {
                    state
                        .connections
                        .get(id)
                        .map(|entry| (*id, entry.sender.clone(), channel.clone()))
                }));
            }
            None => {
                targets.extend(state.connections.iter().filter_map(|(id, entry)| {
                    let scope = entry.scope.as_ref()?;
                    let channel: Arc<str> = Arc::from(scoped_channel(scope));
                    Some((*id, entry.sender.clone(), channel))
                }));
            }
        }

        targets
    }
}

/// Removes its connection from the hub when dropped.
pub struct ConnectionGuard {
    hub: BroadcastHub,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn join(&self, scope: Scope) -> bool {
        self.hub.join(self.id, scope)
    }

    pub fn leave_room(&self) -> Option<Scope> {
        self.hub.leave_room(self.id)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.leave(self.id);
    }
}
