//! Append-only audit trail of update decisions and outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// Outcome recorded with an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
    Blocked,
    Skipped,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Blocked => "blocked",
            AuditStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Step name (`signature-verify`, `pre-update-hook`, `update`, ...).
    pub action: String,
    pub container_name: String,
    pub container_image: String,
    pub status: AuditStatus,
    /// Human-readable details for diagnosis.
    pub details: String,
}

impl AuditEntry {
    pub fn new(
        action: &str,
        container_name: &str,
        container_image: &str,
        status: AuditStatus,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.to_string(),
            container_name: container_name.to_string(),
            container_image: container_image.to_string(),
            status,
            details: details.into(),
        }
    }
}

/// Audit sink. Append failures must never abort an update; callers log and
/// continue.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
}
