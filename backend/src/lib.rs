//! # Heartify Rust Backend
//!
//! Real-time propagation and aggregation of heart-rate readings.
//!
//! Stored samples flow through a change feed into a single
//! [`services::ChangeWatcher`], which normalizes each raw change and hands it
//! to the [`services::BroadcastHub`]. The hub fans events out to connections
//! grouped into per-user rooms. Aggregated daily, weekly and monthly views
//! are computed on demand from store queries.
//!
//! ## Architecture
//!
//! - [`models`]: samples, scopes, time windows and change events
//! - [`db`]: repository traits, in-memory and PostgreSQL backends, change feeds
//! - [`services`]: change watcher, aggregator, broadcast hub, client merge
//! - [`config`]: server and realtime settings
//! - [`http`]: Axum REST API with WebSocket and SSE transports

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod config;
pub mod db;
pub mod models;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;
