//! System health and status handlers.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use tracing::instrument;

use crate::api::AppState;
use crate::db::{PoolState, PoolStats};

/// Pool occupancy as reported on `/health`.
#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub state: PoolState,
    pub capacity: u32,
    pub size: u32,
    pub idle: usize,
    pub borrowed: usize,
}

impl From<PoolStats> for DatabaseHealth {
    fn from(stats: PoolStats) -> Self {
        Self {
            state: stats.state,
            capacity: stats.capacity,
            size: stats.size,
            idle: stats.idle,
            borrowed: stats.borrowed,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` while the pool is ready, `degraded` otherwise
    pub status: &'static str,
    pub database: DatabaseHealth,
    pub active_subscribers: usize,
}

#[instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.db().pool().stats();
    let status = if stats.state == PoolState::Ready {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        database: stats.into(),
        active_subscribers: state.notifier().subscriber_count(),
    })
}
