//! Watch cycle: per-container detection pipeline and batch reconciliation.
//!
//! One cycle per container runs fetch tags, rank candidates, resolve the
//! remote digest (when enabled), classify, persist, report. Transient
//! failures are recorded on the record without discarding the last known
//! result; a registry without a provider degrades the same way.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::classify::classify;
use crate::config::{resolve_watch_config, UpdockConfig};
use crate::error::Result;
use crate::events::{Event, EventBus, EventType};
use crate::registry::{self, ProviderRegistry};
use crate::store::Store;
use crate::types::{ContainerRecord, UpdateResult};
use crate::version;

pub struct Watcher {
    pub id: String,
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn Store>,
    events: EventBus,
    config: UpdockConfig,
}

impl Watcher {
    pub fn new(
        id: &str,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn Store>,
        events: EventBus,
        config: UpdockConfig,
    ) -> Self {
        Self { id: id.to_string(), providers, store, events, config }
    }

    /// Admit a freshly inspected container into the store. The image
    /// snapshot is replaced wholesale; operator policy and the last watch
    /// outcome carry over from the persisted record.
    pub async fn admit(&self, mut record: ContainerRecord) -> Result<ContainerRecord> {
        record.watcher = self.id.clone();
        match self.store.get_container(&record.id).await? {
            Some(existing) => {
                record.update_policy = existing.update_policy;
                record.result = existing.result;
                record.update_available = existing.update_available;
                record.update_kind = existing.update_kind;
                record.security_report = existing.security_report;
                record.missing = false;
                self.store.update_container(&record).await?;
            }
            None => {
                info!(container = %record.name, "Watching new container");
                self.store.insert_container(&record).await?;
            }
        }
        Ok(record)
    }

    /// Run the detection pipeline for one container and persist the outcome.
    #[instrument(skip(self, record), fields(container = %record.name))]
    pub async fn process_container(&self, mut record: ContainerRecord) -> Result<ContainerRecord> {
        self.stamp_watch_config(&mut record);
        record.error = None;

        let Some(provider) = self.providers.find(&record.image) else {
            warn!(
                image = %record.image.display_ref(),
                "No registry provider matches, keeping last known result"
            );
            record.error =
                Some(format!("no registry provider matches {}", record.image.display_ref()));
            self.store.update_container(&record).await?;
            self.report(&record);
            return Ok(record);
        };
        record.image = provider.normalize_image(record.image);

        let tags = match provider.get_tags(&record.image).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "Tag fetch failed, keeping last known result");
                record.error = Some(e.to_string());
                self.store.update_container(&record).await?;
                self.report(&record);
                return Ok(record);
            }
        };
        debug!(count = tags.len(), "Fetched tags");

        let candidates = version::rank(&record, &tags);
        let top_candidate = candidates.first().cloned();
        let remote_tag = top_candidate.clone().unwrap_or_else(|| record.image.tag.value.clone());

        let mut result = UpdateResult { tag: remote_tag.clone(), ..Default::default() };
        if record.image.digest.watch_enabled && record.image.digest.repo_digest.is_some() {
            match registry::resolve_digest(&provider, &record.image, top_candidate.as_deref())
                .await
            {
                Ok(resolution) => {
                    result.digest = Some(resolution.digest);
                    result.created = resolution.created;
                }
                Err(e) => {
                    warn!(error = %e, "Digest resolution failed");
                    record.error = Some(e.to_string());
                }
            }
        }
        if let Some(template) = &record.link_template {
            result.link = Some(render_link(template, &remote_tag));
        }

        let previously_available = record.update_available;
        let previous_result = record.result.take();
        record.result = Some(result);

        let classification = classify(&record);
        let result_changed = previous_result
            .map(|p| Some(&p) != record.result.as_ref())
            .unwrap_or(true);
        record.changed = classification.update_available
            && (!previously_available || result_changed);
        record.update_available = classification.update_available;
        record.update_kind = classification.update_kind;

        if record.update_available {
            info!(
                kind = %record.update_kind.kind,
                remote = %remote_tag,
                "Update available"
            );
        }

        self.store.update_container(&record).await?;
        self.report(&record);
        Ok(record)
    }

    /// Process a batch of containers concurrently and emit cycle events.
    pub async fn run_cycle(
        &self,
        records: Vec<ContainerRecord>,
    ) -> Vec<Result<ContainerRecord>> {
        let total = records.len();
        self.events.publish(Event::new(
            EventType::WatcherStarted,
            &self.id,
            &format!("Watch cycle started for {total} containers"),
        ));

        let results =
            join_all(records.into_iter().map(|record| self.process_container(record))).await;

        let available = results
            .iter()
            .filter(|r| matches!(r, Ok(record) if record.update_available))
            .count();
        let errored = results.iter().filter(|r| r.is_err()).count();
        self.events.publish(
            Event::new(
                EventType::BatchReport,
                &self.id,
                &format!("Watch cycle finished: {available}/{total} updates available"),
            )
            .with_metadata("total", &total.to_string())
            .with_metadata("updatesAvailable", &available.to_string())
            .with_metadata("errors", &errored.to_string()),
        );
        self.events.publish(Event::new(
            EventType::WatcherStopped,
            &self.id,
            "Watch cycle finished",
        ));
        results
    }

    /// Reconcile stored records against the engine inventory. A container
    /// missing once is flagged; missing a second consecutive cycle, its
    /// record is deleted.
    pub async fn reconcile_missing(
        &self,
        records: Vec<ContainerRecord>,
        live_ids: &HashSet<String>,
    ) -> Result<()> {
        for mut record in records {
            if live_ids.contains(&record.id) {
                if record.missing {
                    record.missing = false;
                    self.store.update_container(&record).await?;
                }
                continue;
            }
            if record.missing {
                info!(container = %record.name, "Container gone for two cycles, dropping record");
                self.store.delete_container(&record.id).await?;
            } else {
                debug!(container = %record.name, "Container missing, flagging for grace check");
                record.missing = true;
                self.store.update_container(&record).await?;
            }
        }
        Ok(())
    }

    /// Resolve effective watch settings from labels, imgsets and global
    /// defaults onto the record for this cycle.
    fn stamp_watch_config(&self, record: &mut ContainerRecord) {
        let watch = resolve_watch_config(&self.config, &record.labels);
        record.include_tags = watch.include_tags;
        record.exclude_tags = watch.exclude_tags;
        record.transform_tags = watch.transform_tags;
        record.link_template = watch.link_template;
        record.trigger_include = watch.trigger_include;
        record.trigger_exclude = watch.trigger_exclude;
        if watch.display_name.is_some() {
            record.display_name = watch.display_name;
        }
        record.image.digest.watch_enabled = watch.digest_watch;
    }

    fn report(&self, record: &ContainerRecord) {
        self.events.publish(
            Event::new(
                EventType::ContainerReport,
                &record.id,
                &format!("Watched {}", record.name),
            )
            .with_metadata("updateAvailable", &record.update_available.to_string())
            .with_metadata("kind", record.update_kind.kind.as_str()),
        );
    }
}

/// Render a release link from a template. `${raw}` substitutes the remote
/// tag verbatim; `${major}`, `${minor}` and `${patch}` substitute version
/// components when the tag coerces, else empty strings.
fn render_link(template: &str, remote_tag: &str) -> String {
    let mut link = template.replace("${raw}", remote_tag);
    match version::coerce(remote_tag) {
        Some(v) => {
            link = link.replace("${major}", &v.major.to_string());
            link = link.replace("${minor}", &v.minor.to_string());
            link = link.replace("${patch}", &v.patch.to_string());
        }
        None => {
            link = link.replace("${major}", "");
            link = link.replace("${minor}", "");
            link = link.replace("${patch}", "");
        }
    }
    link
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_link_semver_components() {
        assert_eq!(
            render_link("https://example.com/releases/v${major}.${minor}.${patch}", "1.2.3"),
            "https://example.com/releases/v1.2.3"
        );
    }

    #[test]
    fn test_render_link_raw() {
        assert_eq!(
            render_link("https://example.com/tags/${raw}", "1.2.3-alpine"),
            "https://example.com/tags/1.2.3-alpine"
        );
    }

    #[test]
    fn test_render_link_non_semver_components_empty() {
        assert_eq!(render_link("v${major}", "latest"), "v");
    }
}
