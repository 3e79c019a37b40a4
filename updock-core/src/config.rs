//! Configuration management.
//!
//! Global settings persist as JSON. Per-container watch settings are
//! resolved once per cycle from engine labels, named imgset presets, and
//! global defaults (in that precedence order) into a plain [`WatchConfig`]
//! value object consumed by the rest of the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdockError};
use crate::security::SecurityPolicy;

/// Label keys recognized on containers.
pub mod labels {
    pub const INCLUDE_TAGS: &str = "updock.tag.include";
    pub const EXCLUDE_TAGS: &str = "updock.tag.exclude";
    pub const TRANSFORM_TAGS: &str = "updock.tag.transform";
    pub const DIGEST_WATCH: &str = "updock.digest.watch";
    pub const LINK_TEMPLATE: &str = "updock.link.template";
    pub const TRIGGER_INCLUDE: &str = "updock.trigger.include";
    pub const TRIGGER_EXCLUDE: &str = "updock.trigger.exclude";
    pub const IMGSET: &str = "updock.imgset";
    pub const ROLLBACK: &str = "updock.rollback";
    pub const DISPLAY_NAME: &str = "updock.display.name";
}

/// Named preset bundling default filters for a class of images.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImgsetPreset {
    pub include_tags: Option<String>,
    pub exclude_tags: Option<String>,
    pub transform_tags: Option<String>,
    pub digest_watch: Option<bool>,
    pub link_template: Option<String>,
    pub rollback: Option<bool>,
}

/// Persistent global configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdockConfig {
    pub log_level: String,
    /// Pull but never replace.
    pub dry_run: bool,
    /// Remove the superseded image after a successful update.
    pub prune_images: bool,
    /// Backup records kept per container.
    pub backup_retention: u32,
    /// Bound on waiting for an auto-remove container to disappear.
    pub auto_remove_timeout_secs: u64,
    pub hook_timeout_secs: u64,
    pub pre_update_hook: Option<String>,
    pub post_update_hook: Option<String>,
    /// Abort the update when the pre-update hook fails.
    pub abort_on_pre_hook_failure: bool,
    /// Health observation window after an update, for opted-in containers.
    pub rollback_window_secs: u64,
    pub rollback_poll_secs: u64,
    pub security: SecurityPolicy,
    /// Global tag-filter defaults, overridable per imgset and per label.
    pub include_tags: Option<String>,
    pub exclude_tags: Option<String>,
    pub transform_tags: Option<String>,
    pub digest_watch: bool,
    pub link_template: Option<String>,
    /// Arm the post-update health monitor for all containers by default.
    pub rollback: bool,
    pub imgsets: HashMap<String, ImgsetPreset>,
}

impl Default for UpdockConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dry_run: false,
            prune_images: true,
            backup_retention: 3,
            auto_remove_timeout_secs: 60,
            hook_timeout_secs: 60,
            pre_update_hook: None,
            post_update_hook: None,
            abort_on_pre_hook_failure: true,
            rollback_window_secs: 300,
            rollback_poll_secs: 10,
            security: SecurityPolicy::default(),
            include_tags: None,
            exclude_tags: None,
            transform_tags: None,
            digest_watch: false,
            link_template: None,
            rollback: false,
            imgsets: HashMap::new(),
        }
    }
}

impl UpdockConfig {
    /// Load configuration from a JSON file; missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| UpdockError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| UpdockError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UpdockError::Io { path: parent.to_path_buf(), source: e })?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| UpdockError::InvalidConfig {
                reason: format!("Failed to serialize config: {}", e),
            })?;
        std::fs::write(path, content)
            .map_err(|e| UpdockError::Io { path: PathBuf::from(path), source: e })
    }
}

/// Per-container watch settings resolved for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchConfig {
    pub include_tags: Option<String>,
    pub exclude_tags: Option<String>,
    pub transform_tags: Option<String>,
    pub digest_watch: bool,
    pub link_template: Option<String>,
    pub trigger_include: Option<String>,
    pub trigger_exclude: Option<String>,
    pub display_name: Option<String>,
    pub rollback: bool,
}

/// Resolve the effective watch settings for a container.
///
/// Precedence: explicit label > imgset preset (named by the imgset label)
/// > global default.
pub fn resolve_watch_config(
    global: &UpdockConfig,
    container_labels: &HashMap<String, String>,
) -> WatchConfig {
    let preset = container_labels
        .get(labels::IMGSET)
        .and_then(|name| global.imgsets.get(name))
        .cloned()
        .unwrap_or_default();

    let pick = |label: &str, preset_value: &Option<String>, global_value: &Option<String>| {
        container_labels
            .get(label)
            .cloned()
            .or_else(|| preset_value.clone())
            .or_else(|| global_value.clone())
    };

    let digest_watch = container_labels
        .get(labels::DIGEST_WATCH)
        .map(|v| v == "true")
        .or(preset.digest_watch)
        .unwrap_or(global.digest_watch);

    let rollback = container_labels
        .get(labels::ROLLBACK)
        .map(|v| v == "true")
        .or(preset.rollback)
        .unwrap_or(global.rollback);

    WatchConfig {
        include_tags: pick(labels::INCLUDE_TAGS, &preset.include_tags, &global.include_tags),
        exclude_tags: pick(labels::EXCLUDE_TAGS, &preset.exclude_tags, &global.exclude_tags),
        transform_tags: pick(
            labels::TRANSFORM_TAGS,
            &preset.transform_tags,
            &global.transform_tags,
        ),
        digest_watch,
        link_template: pick(labels::LINK_TEMPLATE, &preset.link_template, &global.link_template),
        trigger_include: container_labels.get(labels::TRIGGER_INCLUDE).cloned(),
        trigger_exclude: container_labels.get(labels::TRIGGER_EXCLUDE).cloned(),
        display_name: container_labels.get(labels::DISPLAY_NAME).cloned(),
        rollback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_label_beats_imgset_beats_global() {
        let mut global = UpdockConfig {
            include_tags: Some("global".into()),
            ..Default::default()
        };
        global.imgsets.insert(
            "linuxserver".into(),
            ImgsetPreset { include_tags: Some("preset".into()), ..Default::default() },
        );

        // Global only.
        let resolved = resolve_watch_config(&global, &HashMap::new());
        assert_eq!(resolved.include_tags.as_deref(), Some("global"));

        // Imgset overrides global.
        let resolved =
            resolve_watch_config(&global, &labels_of(&[(labels::IMGSET, "linuxserver")]));
        assert_eq!(resolved.include_tags.as_deref(), Some("preset"));

        // Explicit label overrides both.
        let resolved = resolve_watch_config(
            &global,
            &labels_of(&[(labels::IMGSET, "linuxserver"), (labels::INCLUDE_TAGS, "label")]),
        );
        assert_eq!(resolved.include_tags.as_deref(), Some("label"));
    }

    #[test]
    fn test_digest_watch_precedence() {
        let mut global = UpdockConfig::default();
        global.imgsets.insert(
            "mutable".into(),
            ImgsetPreset { digest_watch: Some(true), ..Default::default() },
        );

        assert!(!resolve_watch_config(&global, &HashMap::new()).digest_watch);
        assert!(
            resolve_watch_config(&global, &labels_of(&[(labels::IMGSET, "mutable")]))
                .digest_watch
        );
        assert!(!resolve_watch_config(
            &global,
            &labels_of(&[(labels::IMGSET, "mutable"), (labels::DIGEST_WATCH, "false")])
        )
        .digest_watch);
    }

    #[test]
    fn test_unknown_imgset_falls_back_to_global() {
        let global = UpdockConfig { exclude_tags: Some("rc".into()), ..Default::default() };
        let resolved = resolve_watch_config(&global, &labels_of(&[(labels::IMGSET, "nope")]));
        assert_eq!(resolved.exclude_tags.as_deref(), Some("rc"));
    }

    #[test]
    fn test_rollback_precedence() {
        let mut global = UpdockConfig { rollback: true, ..Default::default() };
        global.imgsets.insert(
            "cautious".into(),
            ImgsetPreset { rollback: Some(false), ..Default::default() },
        );

        assert!(resolve_watch_config(&global, &HashMap::new()).rollback);
        assert!(
            !resolve_watch_config(&global, &labels_of(&[(labels::IMGSET, "cautious")]))
                .rollback
        );
        assert!(resolve_watch_config(
            &global,
            &labels_of(&[(labels::IMGSET, "cautious"), (labels::ROLLBACK, "true")])
        )
        .rollback);
    }

    #[test]
    fn test_config_defaults() {
        let config = UpdockConfig::default();
        assert_eq!(config.backup_retention, 3);
        assert!(config.prune_images);
        assert!(config.abort_on_pre_hook_failure);
        assert!(!config.dry_run);
    }
}
