//! Change notification payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
}

/// Broadcast hint that an entity changed. Carries no payload of the change
/// itself; consumers re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub operation: ChangeOperation,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            timestamp: Utc::now(),
        }
    }

    pub fn created(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(entity_type, entity_id, ChangeOperation::Created)
    }

    pub fn updated(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(entity_type, entity_id, ChangeOperation::Updated)
    }

    pub fn deleted(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(entity_type, entity_id, ChangeOperation::Deleted)
    }
}
