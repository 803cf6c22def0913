//! Data access and real-time change propagation for the dashboard backend.
//!
//! - [`db`]: bounded connection pool, generic query engine, transactions
//! - [`realtime`]: change notifications, reconnecting client, refresh coalescing
//! - [`api`]: HTTP/WebSocket surface serving `/ws` and `/health`
//! - [`config`]: environment-driven settings

pub mod api;
pub mod config;
pub mod db;
pub mod realtime;
