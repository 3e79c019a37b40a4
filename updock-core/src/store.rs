//! Persistence seam for container records and backup history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::types::ContainerRecord;

/// Pre-update snapshot reference, enough to identify the previous
/// image/tag/digest for pruning or manual rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub container_id: String,
    pub container_name: String,
    /// Fully-qualified image reference that was running before the update.
    pub image: String,
    pub tag: String,
    pub digest: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupRecord {
    pub fn new(
        container_id: &str,
        container_name: &str,
        image: &str,
        tag: &str,
        digest: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            image: image.to_string(),
            tag: tag.to_string(),
            digest,
            created_at: Utc::now(),
        }
    }
}

/// Persisted container store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>>;

    async fn insert_container(&self, record: &ContainerRecord) -> Result<()>;

    async fn update_container(&self, record: &ContainerRecord) -> Result<()>;

    async fn delete_container(&self, id: &str) -> Result<()>;

    async fn insert_backup(&self, backup: &BackupRecord) -> Result<()>;

    /// Backups for a container name, newest first.
    async fn list_backups(&self, container_name: &str) -> Result<Vec<BackupRecord>>;

    async fn delete_backup(&self, id: &str) -> Result<()>;
}
