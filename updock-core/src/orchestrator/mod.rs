//! Update orchestration.
//!
//! Applies a detected update to a container as a sequence of steps:
//! security gate, pre-update hook, backup, pull, replace, post-update hook,
//! image prune, rollback monitor. A failed step aborts the remaining
//! sequence (the post-update hook and prune never abort), emits an
//! `update.failed` event and propagates the error. Per-container runs are
//! single-flight; batch runs fan out concurrently across containers.

mod recreate;
mod rollback;

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEntry, AuditStatus, AuditWriter};
use crate::config::{resolve_watch_config, UpdockConfig};
use crate::engine::{ContainerEngine, ContainerInspect, PullProgress};
use crate::error::{Result, UpdockError};
use crate::events::{Event, EventBus, EventType};
use crate::hooks::{HookRunner, HookSpec};
use crate::registry::{ProviderRegistry, RegistryCredentials, RegistryProvider};
use crate::security::{ScanVerdict, SecurityReport, SecurityScanner, SignatureStatus};
use crate::store::{BackupRecord, Store};
use crate::types::{ChangeKind, ContainerRecord};

use rollback::RollbackMonitor;

/// Minimum interval between logged pull progress lines.
const PULL_LOG_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The container was replaced; carries the new container id.
    Applied { new_container_id: String },
    /// Dry-run mode: the image was pulled but the container was left alone.
    DryRun,
    /// The container disappeared before the update started.
    Vanished,
}

pub struct UpdateOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn Store>,
    events: EventBus,
    hooks: Arc<dyn HookRunner>,
    audit: Arc<dyn AuditWriter>,
    scanner: Option<Arc<dyn SecurityScanner>>,
    config: UpdockConfig,
    locks: LockMap,
}

/// Per-container mutexes serializing overlapping update requests. Entries
/// are evicted once no task holds them, so the map tracks in-flight
/// containers rather than every container ever updated.
struct LockMap {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockMap {
    fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    async fn acquire(&self, id: &str) -> Arc<Mutex<()>> {
        let mut inner = self.inner.lock().await;
        inner.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Evict the entry when the map holds the only remaining reference.
    async fn release(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            inner.remove(id);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl UpdateOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn Store>,
        events: EventBus,
        hooks: Arc<dyn HookRunner>,
        audit: Arc<dyn AuditWriter>,
        config: UpdockConfig,
    ) -> Self {
        Self {
            engine,
            providers,
            store,
            events,
            hooks,
            audit,
            scanner: None,
            config,
            locks: LockMap::new(),
        }
    }

    /// Enable the security gate with the given scanner.
    pub fn with_scanner(mut self, scanner: Arc<dyn SecurityScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Apply the detected update to one container.
    #[instrument(skip(self, container), fields(container = %container.name))]
    pub async fn apply(&self, container: &ContainerRecord) -> Result<UpdateOutcome> {
        let lock = self.locks.acquire(&container.id).await;
        let guard = lock.lock().await;

        let result = match self.run_update(container).await {
            Ok(outcome) => {
                if let UpdateOutcome::Applied { new_container_id } = &outcome {
                    info!(
                        container = %container.name,
                        new_id = %new_container_id,
                        "Update applied"
                    );
                    self.events.publish(
                        Event::new(
                            EventType::UpdateApplied,
                            &container.id,
                            &format!("Update applied to {}", container.name),
                        )
                        .with_metadata("newContainerId", new_container_id),
                    );
                    self.record_audit(
                        container,
                        "update",
                        AuditStatus::Success,
                        format!(
                            "{} updated to {}",
                            container.image.display_ref(),
                            container
                                .result
                                .as_ref()
                                .map(|r| r.tag.as_str())
                                .unwrap_or("unknown")
                        ),
                    )
                    .await;
                    self.prune_backups(&container.name).await;
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!(container = %container.name, error = %e, "Update failed");
                self.events.publish(Event::new(
                    EventType::UpdateFailed,
                    &container.id,
                    &format!("Update of {} failed: {e}", container.name),
                ));
                Err(e)
            }
        };

        drop(guard);
        drop(lock);
        self.locks.release(&container.id).await;
        result
    }

    /// Apply updates to a batch of containers concurrently. Failures are
    /// isolated per container.
    pub async fn apply_batch(
        &self,
        containers: &[ContainerRecord],
    ) -> Vec<(String, Result<UpdateOutcome>)> {
        let results = join_all(
            containers
                .iter()
                .map(|container| async move { (container.id.clone(), self.apply(container).await) }),
        )
        .await;

        let applied = results
            .iter()
            .filter(|(_, r)| matches!(r, Ok(UpdateOutcome::Applied { .. })))
            .count();
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        self.events.publish(
            Event::new(
                EventType::BatchReport,
                "batch",
                &format!("Batch update finished: {applied} applied, {failed} failed"),
            )
            .with_metadata("applied", &applied.to_string())
            .with_metadata("failed", &failed.to_string()),
        );
        results
    }

    async fn run_update(&self, container: &ContainerRecord) -> Result<UpdateOutcome> {
        let provider = self.providers.find(&container.image).ok_or_else(|| {
            UpdockError::UnsupportedRegistry { image: container.image.display_ref() }
        })?;
        let target_ref = self.target_reference(container, &provider)?;

        let Some(inspect) = self.engine.inspect_container(&container.id).await? else {
            info!(container = %container.name, "Container no longer exists, skipping update");
            return Ok(UpdateOutcome::Vanished);
        };

        if let Some(scanner) = &self.scanner {
            self.security_gate(scanner, container, &target_ref).await?;
        }

        if let Some(command) = self.config.pre_update_hook.clone() {
            self.run_hook("pre-update-hook", &command, container, &target_ref, true).await?;
        }

        let backup = BackupRecord::new(
            &container.id,
            &container.name,
            &provider.get_image_full_name(&container.image, &container.image.tag.value),
            &container.image.tag.value,
            container
                .image
                .digest
                .resolved_value
                .clone()
                .or_else(|| container.image.digest.repo_digest.clone()),
        );
        self.store.insert_backup(&backup).await?;

        let auth = provider.get_auth_pull().await?;
        self.pull_image(&target_ref, auth).await?;

        if self.config.dry_run {
            info!(container = %container.name, image = %target_ref, "Dry run, container left untouched");
            return Ok(UpdateOutcome::DryRun);
        }

        let new_id = recreate::replace_container(
            &self.engine,
            &inspect,
            &target_ref,
            Duration::from_secs(self.config.auto_remove_timeout_secs),
        )
        .await
        .map_err(|e| UpdockError::ReplaceFailed {
            container: container.name.clone(),
            reason: e.to_string(),
        })?;

        if let Some(command) = self.config.post_update_hook.clone() {
            // Never aborts: the container is already replaced.
            let _ = self.run_hook("post-update-hook", &command, container, &target_ref, false).await;
        }

        if self.config.prune_images {
            self.prune_old_image(&provider, container).await;
        }

        self.maybe_arm_rollback(container, &inspect, &new_id, backup);

        Ok(UpdateOutcome::Applied { new_container_id: new_id })
    }

    /// Fully-qualified reference for the detected update: the remote tag for
    /// a tag change, `@digest` for a digest change.
    fn target_reference(
        &self,
        container: &ContainerRecord,
        provider: &Arc<dyn RegistryProvider>,
    ) -> Result<String> {
        let result = container
            .result
            .as_ref()
            .ok_or_else(|| UpdockError::Internal("no watch result to apply".into()))?;
        match container.update_kind.kind {
            ChangeKind::Tag => Ok(provider.get_image_full_name(&container.image, &result.tag)),
            ChangeKind::Digest => {
                let digest = result
                    .digest
                    .as_deref()
                    .or(container.update_kind.remote_value.as_deref())
                    .ok_or_else(|| {
                        UpdockError::Internal("digest change without a remote digest".into())
                    })?;
                Ok(provider.get_image_full_name(&container.image, digest))
            }
            ChangeKind::Unknown => {
                Err(UpdockError::Internal("no detected update to apply".into()))
            }
        }
    }

    async fn security_gate(
        &self,
        scanner: &Arc<dyn SecurityScanner>,
        container: &ContainerRecord,
        target_ref: &str,
    ) -> Result<()> {
        let policy = &self.config.security;
        let mut report = SecurityReport {
            image: target_ref.to_string(),
            scanned_at: chrono::Utc::now(),
            signature: None,
            verdict: None,
            findings: Vec::new(),
            sbom_generated: false,
        };

        if policy.verify_signatures {
            match scanner.verify_signature(target_ref).await {
                Ok(status) => {
                    report.signature = Some(status);
                    if status == SignatureStatus::Unverified {
                        self.record_audit(
                            container,
                            "signature-verify",
                            AuditStatus::Blocked,
                            format!("signature of {target_ref} could not be verified"),
                        )
                        .await;
                        self.persist_report(container, report).await;
                        return Err(UpdockError::SecurityGate {
                            image: target_ref.to_string(),
                            reason: "image signature could not be verified".into(),
                        });
                    }
                    self.record_audit(
                        container,
                        "signature-verify",
                        AuditStatus::Success,
                        format!("signature {}", status_str(status)),
                    )
                    .await;
                }
                Err(e) => {
                    self.record_audit(
                        container,
                        "signature-verify",
                        AuditStatus::Failure,
                        format!("signature verification failed: {e}"),
                    )
                    .await;
                    self.persist_report(container, report).await;
                    return Err(UpdockError::SecurityGate {
                        image: target_ref.to_string(),
                        reason: format!("signature verification failed: {e}"),
                    });
                }
            }
        }

        let findings = match scanner.scan_image(target_ref).await {
            Ok(findings) => findings,
            Err(e) => {
                self.record_audit(
                    container,
                    "vulnerability-scan",
                    AuditStatus::Failure,
                    format!("scan failed: {e}"),
                )
                .await;
                self.persist_report(container, report).await;
                return Err(UpdockError::SecurityGate {
                    image: target_ref.to_string(),
                    reason: format!("vulnerability scan failed: {e}"),
                });
            }
        };

        let verdict = policy.verdict(&findings);
        report.verdict = Some(verdict);
        report.findings = findings;

        if policy.generate_sbom {
            match scanner.generate_sbom(target_ref).await {
                Ok(_) => report.sbom_generated = true,
                Err(e) => warn!(image = %target_ref, error = %e, "SBOM generation failed"),
            }
        }

        let finding_count = report.findings.len();
        self.persist_report(container, report).await;

        match verdict {
            ScanVerdict::Blocked => {
                self.record_audit(
                    container,
                    "vulnerability-scan",
                    AuditStatus::Blocked,
                    format!(
                        "{finding_count} findings, severity above {}",
                        policy.max_allowed_severity
                    ),
                )
                .await;
                Err(UpdockError::SecurityGate {
                    image: target_ref.to_string(),
                    reason: format!(
                        "vulnerabilities above {} found",
                        policy.max_allowed_severity
                    ),
                })
            }
            ScanVerdict::Passed => {
                self.record_audit(
                    container,
                    "vulnerability-scan",
                    AuditStatus::Success,
                    format!("{finding_count} findings within policy"),
                )
                .await;
                Ok(())
            }
        }
    }

    /// The report is persisted regardless of the verdict; persistence
    /// failures are logged, not propagated.
    async fn persist_report(&self, container: &ContainerRecord, report: SecurityReport) {
        let mut record = container.clone();
        record.security_report = Some(report);
        if let Err(e) = self.store.update_container(&record).await {
            warn!(container = %container.name, error = %e, "Failed to persist security report");
        }
    }

    async fn run_hook(
        &self,
        stage: &str,
        command: &str,
        container: &ContainerRecord,
        target_ref: &str,
        may_abort: bool,
    ) -> Result<()> {
        let mut env = HashMap::new();
        env.insert("UPDOCK_CONTAINER_NAME".to_string(), container.name.clone());
        env.insert("UPDOCK_CONTAINER_IMAGE".to_string(), container.image.display_ref());
        env.insert("UPDOCK_TARGET_IMAGE".to_string(), target_ref.to_string());
        if let Some(result) = &container.result {
            env.insert("UPDOCK_REMOTE_TAG".to_string(), result.tag.clone());
        }
        let spec = HookSpec {
            command: command.to_string(),
            timeout: Duration::from_secs(self.config.hook_timeout_secs),
            env,
        };

        let failure = match self.hooks.run(&spec).await {
            Ok(outcome) if outcome.success() => {
                self.record_audit(container, stage, AuditStatus::Success, outcome.describe())
                    .await;
                return Ok(());
            }
            Ok(outcome) => outcome.describe(),
            Err(e) => e.to_string(),
        };

        self.record_audit(container, stage, AuditStatus::Failure, failure.clone()).await;
        if may_abort && self.config.abort_on_pre_hook_failure {
            Err(UpdockError::HookFailed { stage: stage.to_string(), reason: failure })
        } else {
            warn!(container = %container.name, stage, reason = %failure, "Hook failed, continuing");
            Ok(())
        }
    }

    /// Pull the target image, draining the progress stream into throttled
    /// debug logs. The final progress line is always logged.
    async fn pull_image(
        &self,
        reference: &str,
        auth: Option<RegistryCredentials>,
    ) -> Result<()> {
        info!(image = %reference, "Pulling image");
        let (tx, mut rx) = mpsc::channel::<PullProgress>(32);
        let image = reference.to_string();
        let logger = tokio::spawn(async move {
            let mut last_line = String::new();
            let mut last_logged_at: Option<Instant> = None;
            let mut latest: Option<String> = None;
            while let Some(progress) = rx.recv().await {
                let line = match (&progress.layer, &progress.detail) {
                    (Some(layer), Some(detail)) => {
                        format!("{layer}: {} {detail}", progress.status)
                    }
                    (Some(layer), None) => format!("{layer}: {}", progress.status),
                    (None, _) => progress.status.clone(),
                };
                latest = Some(line.clone());
                let due = last_logged_at.is_none_or(|at| at.elapsed() >= PULL_LOG_INTERVAL);
                if line != last_line && due {
                    debug!(image = %image, "{line}");
                    last_line = line;
                    last_logged_at = Some(Instant::now());
                }
            }
            if let Some(line) = latest {
                info!(image = %image, "{line}");
            }
        });

        let result = self.engine.pull_image(reference, auth, tx).await;
        let _ = logger.await;
        result.map_err(|e| UpdockError::PullFailed {
            image: reference.to_string(),
            reason: e.to_string(),
        })
    }

    /// Best-effort removal of the superseded image reference.
    async fn prune_old_image(
        &self,
        provider: &Arc<dyn RegistryProvider>,
        container: &ContainerRecord,
    ) {
        let old_ref = match container.update_kind.kind {
            ChangeKind::Tag => {
                provider.get_image_full_name(&container.image, &container.image.tag.value)
            }
            ChangeKind::Digest => match container.update_kind.local_value.as_deref() {
                Some(digest) => provider.get_image_full_name(&container.image, digest),
                None => return,
            },
            ChangeKind::Unknown => return,
        };
        if let Err(e) = self.engine.remove_image(&old_ref).await {
            debug!(image = %old_ref, error = %e, "Image prune failed");
        }
    }

    async fn prune_backups(&self, container_name: &str) {
        let backups = match self.store.list_backups(container_name).await {
            Ok(backups) => backups,
            Err(e) => {
                warn!(container = %container_name, error = %e, "Failed to list backups");
                return;
            }
        };
        for stale in backups.iter().skip(self.config.backup_retention as usize) {
            if let Err(e) = self.store.delete_backup(&stale.id).await {
                warn!(backup = %stale.id, error = %e, "Failed to prune backup");
            }
        }
    }

    /// Arm the health monitor for containers opted in through the resolved
    /// rollback setting (label > imgset > global). A container without a
    /// health check cannot be observed.
    fn maybe_arm_rollback(
        &self,
        container: &ContainerRecord,
        inspect: &ContainerInspect,
        new_id: &str,
        backup: BackupRecord,
    ) {
        if !resolve_watch_config(&self.config, &container.labels).rollback {
            return;
        }
        if inspect.config.healthcheck.is_none() {
            warn!(
                container = %container.name,
                "Rollback requested but container has no health check, monitor skipped"
            );
            return;
        }
        let monitor = RollbackMonitor::new(
            self.engine.clone(),
            self.events.clone(),
            self.audit.clone(),
            Duration::from_secs(self.config.rollback_window_secs),
            Duration::from_secs(self.config.rollback_poll_secs),
            Duration::from_secs(self.config.auto_remove_timeout_secs),
        );
        let _ = monitor.arm(new_id.to_string(), container.name.clone(), backup);
    }

    async fn record_audit(
        &self,
        container: &ContainerRecord,
        action: &str,
        status: AuditStatus,
        details: impl Into<String>,
    ) {
        let entry = AuditEntry::new(
            action,
            &container.name,
            &container.image.display_ref(),
            status,
            details,
        );
        if let Err(e) = self.audit.append(entry).await {
            warn!(error = %e, "Failed to append audit entry");
        }
    }

}

fn status_str(status: SignatureStatus) -> &'static str {
    match status {
        SignatureStatus::Verified => "verified",
        SignatureStatus::Unverified => "unverified",
        SignatureStatus::Skipped => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_map_shares_entry_per_id() {
        let locks = LockMap::new();
        let a = locks.acquire("c1").await;
        let b = locks.acquire("c1").await;
        assert!(Arc::ptr_eq(&a, &b));

        // A release while another handle is live must not evict.
        drop(b);
        locks.release("c1").await;
        assert_eq!(locks.len().await, 1);
        drop(a);
    }

    #[tokio::test]
    async fn test_lock_map_evicts_unshared_entries() {
        let locks = LockMap::new();
        let lock = locks.acquire("c1").await;
        let guard = lock.lock().await;
        assert_eq!(locks.len().await, 1);

        drop(guard);
        drop(lock);
        locks.release("c1").await;
        assert_eq!(locks.len().await, 0);
    }
}
