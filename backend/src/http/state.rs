//! Application state for the HTTP server.

use std::sync::Arc;

use crate::db::repository::FullRepository;
use crate::services::BroadcastHub;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sample store and change feed
    pub repository: Arc<dyn FullRepository>,
    /// Registry of realtime connections fed by the change watcher
    pub hub: BroadcastHub,
}

impl AppState {
    pub fn new(repository: Arc<dyn FullRepository>, hub: BroadcastHub) -> Self {
        Self { repository, hub }
    }
}
