//! Real-time pipeline and analytics services.
//!
//! ```text
//! store change feed ──▶ ChangeWatcher ──▶ BroadcastHub ──▶ connections
//!                                                           │
//!                                                           ▼
//! store queries ──▶ views / aggregator ──────────────▶ ClientMerge
//! ```

pub mod aggregator;
pub mod broadcast_hub;
pub mod change_watcher;
pub mod client_merge;
pub mod error;
pub mod views;

pub use aggregator::{aggregate, Bucket, BucketKey, Granularity};
pub use broadcast_hub::{
    BroadcastHub, ConnectionGuard, ConnectionId, HubConfig, HubMessage, PublishReport,
};
pub use change_watcher::{
    spawn_supervised, ChangeWatcher, Subscription, SubscriptionEnd, WatcherHandle,
};
pub use client_merge::{ClientMerge, MergeOutcome, RefreshThrottle};
pub use error::PipelineError;
pub use views::{
    daily_readings, monthly_summary, weekly_summary, DailyReading, MonthlySummary, WeeklySummary,
};
