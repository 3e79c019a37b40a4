//! Container record and image descriptor.
//!
//! These are the persisted shapes consumed by downstream UI and audit
//! readers; field names and nesting (`image.tag`, `image.digest`,
//! `updateKind`, `updatePolicy`) are stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::security::SecurityReport;
use crate::types::update::UpdateKind;

/// Registry the image originates from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRef {
    /// Provider id (e.g. `hub`, `ghcr`).
    pub name: String,
    /// Canonical registry URL.
    pub url: String,
    /// Optional override used for lookups instead of `url`.
    pub lookup_url: Option<String>,
}

/// Current image tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTag {
    pub value: String,
    /// Whether the value parses as a semantic version (after coercion).
    #[serde(rename = "isSemver")]
    pub is_semver: bool,
}

/// Digest-watch state for the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDigest {
    /// Digest watching opted in (mutable tags such as `latest`).
    pub watch_enabled: bool,
    /// Repo digest known from the local engine inspection.
    pub repo_digest: Option<String>,
    /// Digest resolved against the remote registry.
    pub resolved_value: Option<String>,
}

/// Immutable snapshot of an image, captured at inspection time and replaced
/// wholesale on each watch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub registry: RegistryRef,
    /// Repository path (e.g. `library/nginx`).
    pub name: String,
    pub tag: ImageTag,
    pub digest: ImageDigest,
    pub architecture: String,
    pub os: String,
    pub variant: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl ImageDescriptor {
    /// Human-readable `repository:tag` form for logs and audit entries.
    pub fn display_ref(&self) -> String {
        format!("{}:{}", self.name, self.tag.value)
    }
}

/// Operator policy suppressing otherwise-detected updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    pub skip_tags: Vec<String>,
    pub skip_digests: Vec<String>,
    /// RFC 3339 instant until which updates are snoozed. A past or
    /// unparseable value does not suppress.
    pub snooze_until: Option<String>,
}

/// Most recently detected remote candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub tag: String,
    pub digest: Option<String>,
    pub link: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

/// A watched container.
///
/// Created on first sighting, mutated on every watch cycle, removed when the
/// container disappears from the engine inventory (after a grace check).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    /// Owning watcher id.
    pub watcher: String,
    /// Engine lifecycle status (`running`, `exited`, ...).
    pub status: String,
    /// Agent this container reports from, when running remotely.
    pub agent: Option<String>,
    pub image: ImageDescriptor,
    /// Include pattern restricting candidate tags.
    pub include_tags: Option<String>,
    /// Exclude pattern vetoing candidate tags.
    pub exclude_tags: Option<String>,
    /// `"<regex> => <replacement>"` rule applied to tags before comparison.
    pub transform_tags: Option<String>,
    /// Template for the release link shown with a result.
    pub link_template: Option<String>,
    /// Comma-separated trigger include filters (`ref` or `ref:threshold`).
    pub trigger_include: Option<String>,
    /// Comma-separated trigger exclude filters.
    pub trigger_exclude: Option<String>,
    pub update_policy: UpdatePolicy,
    pub result: Option<UpdateResult>,
    pub update_available: bool,
    pub update_kind: UpdateKind,
    /// Set when this cycle first detected the update (or re-detected a new
    /// one); drives `once` trigger semantics.
    pub changed: bool,
    /// Last transient error recorded against this container.
    pub error: Option<String>,
    /// Engine labels, used for rollback opt-in and config resolution.
    pub labels: HashMap<String, String>,
    /// Grace flag: set on the first cycle the container is missing from the
    /// engine inventory; the record is deleted on the second.
    #[serde(default)]
    pub missing: bool,
    /// Latest security gate report, persisted regardless of verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_report: Option<SecurityReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_nesting() {
        let mut record = ContainerRecord {
            id: "abc".into(),
            name: "web".into(),
            ..Default::default()
        };
        record.image.tag = ImageTag { value: "1.0.0".into(), is_semver: true };
        record.image.digest.watch_enabled = true;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["image"]["tag"]["value"], "1.0.0");
        assert_eq!(json["image"]["tag"]["isSemver"], true);
        assert_eq!(json["image"]["digest"]["watchEnabled"], true);
        assert!(json.get("updateKind").is_some());
        assert!(json.get("updatePolicy").is_some());
        assert_eq!(json["updateKind"]["kind"], "unknown");
    }
}
