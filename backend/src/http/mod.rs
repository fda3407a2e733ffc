//! HTTP and realtime transport for the heart-rate backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  HTTP Layer (axum)                                        │
//! │  - REST handlers, WebSocket and SSE transports            │
//! │  - CORS, compression, error mapping                       │
//! └───────────────┬─────────────────────────▲────────────────┘
//!                 │                         │ HubMessage
//! ┌───────────────▼──────────────┐ ┌────────┴────────────────┐
//! │  db::services / views        │ │  BroadcastHub           │
//! └───────────────┬──────────────┘ └────────▲────────────────┘
//!                 │                         │ ChangeEvent
//! ┌───────────────▼─────────────────────────┴────────────────┐
//! │  Repository (LocalRepository / PostgresRepository)        │
//! │  samples + change feed ──▶ ChangeWatcher                  │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;

pub use router::create_router;
pub use state::AppState;
