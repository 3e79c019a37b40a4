//! Post-update health observation and automatic rollback.
//!
//! After an update of an opted-in container, a monitor task polls the
//! engine's health state for a bounded window. An unhealthy report reverts
//! the container to its pre-update image; a healthy report disarms the
//! monitor early.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditStatus, AuditWriter};
use crate::engine::{ContainerEngine, HealthState};
use crate::error::Result;
use crate::events::{Event, EventBus, EventType};
use crate::orchestrator::recreate;
use crate::store::BackupRecord;

pub(crate) struct RollbackMonitor {
    engine: Arc<dyn ContainerEngine>,
    events: EventBus,
    audit: Arc<dyn AuditWriter>,
    window: Duration,
    poll_interval: Duration,
    auto_remove_timeout: Duration,
}

impl RollbackMonitor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        events: EventBus,
        audit: Arc<dyn AuditWriter>,
        window: Duration,
        poll_interval: Duration,
        auto_remove_timeout: Duration,
    ) -> Self {
        Self { engine, events, audit, window, poll_interval, auto_remove_timeout }
    }

    /// Arm the monitor for a freshly updated container. The spawned task
    /// owns its lifetime; the handle is returned for tests and shutdown.
    pub fn arm(
        self,
        container_id: String,
        container_name: String,
        backup: BackupRecord,
    ) -> JoinHandle<()> {
        info!(
            container = %container_name,
            window_secs = self.window.as_secs(),
            "Health monitor armed"
        );
        tokio::spawn(async move {
            self.observe(container_id, container_name, backup).await;
        })
    }

    async fn observe(self, container_id: String, container_name: String, backup: BackupRecord) {
        let deadline = Instant::now() + self.window;
        loop {
            sleep(self.poll_interval).await;
            match self.engine.container_health(&container_id).await {
                Ok(HealthState::Healthy) => {
                    info!(container = %container_name, "Container healthy, monitor disarmed");
                    return;
                }
                Ok(HealthState::Unhealthy) => {
                    warn!(
                        container = %container_name,
                        previous_image = %backup.image,
                        "Container unhealthy after update, rolling back"
                    );
                    self.revert(&container_id, &container_name, &backup).await;
                    return;
                }
                Ok(HealthState::Starting) => {
                    debug!(container = %container_name, "Health check still starting");
                }
                Ok(HealthState::None) => {
                    // Lost its health check across the update; nothing to
                    // observe.
                    warn!(container = %container_name, "No health check reported, monitor disarmed");
                    return;
                }
                Err(e) => {
                    // Transient engine errors do not count as unhealthy.
                    warn!(container = %container_name, error = %e, "Health poll failed");
                }
            }
            if Instant::now() >= deadline {
                info!(
                    container = %container_name,
                    "Observation window elapsed without failure, monitor disarmed"
                );
                return;
            }
        }
    }

    async fn revert(&self, container_id: &str, container_name: &str, backup: &BackupRecord) {
        match self.try_revert(container_id, backup).await {
            Ok(new_id) => {
                self.events.publish(
                    Event::new(
                        EventType::UpdateRolledBack,
                        container_id,
                        &format!("{container_name} rolled back to {}", backup.image),
                    )
                    .with_metadata("newContainerId", &new_id)
                    .with_metadata("image", &backup.image),
                );
                self.record_audit(
                    container_name,
                    &backup.image,
                    AuditStatus::Success,
                    format!("rolled back to {}", backup.image),
                )
                .await;
            }
            Err(e) => {
                warn!(container = %container_name, error = %e, "Rollback failed");
                self.record_audit(
                    container_name,
                    &backup.image,
                    AuditStatus::Failure,
                    format!("rollback failed: {e}"),
                )
                .await;
            }
        }
    }

    async fn try_revert(&self, container_id: &str, backup: &BackupRecord) -> Result<String> {
        let inspect = self
            .engine
            .inspect_container(container_id)
            .await?
            .ok_or_else(|| crate::error::UpdockError::ContainerNotFound {
                container: container_id.to_string(),
            })?;
        recreate::replace_container(&self.engine, &inspect, &backup.image, self.auto_remove_timeout)
            .await
    }

    async fn record_audit(
        &self,
        container_name: &str,
        image: &str,
        status: AuditStatus,
        details: String,
    ) {
        let entry = AuditEntry::new("rollback", container_name, image, status, details);
        if let Err(e) = self.audit.append(entry).await {
            warn!(error = %e, "Failed to append audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::engine::{
        ContainerConfig, ContainerInspect, CreateContainerOptions, EndpointSettings,
        HostConfig, PullProgress,
    };
    use crate::registry::RegistryCredentials;

    struct FakeEngine {
        health: Mutex<VecDeque<HealthState>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn with_health(states: &[HealthState]) -> Arc<Self> {
            Arc::new(Self {
                health: Mutex::new(states.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn inspect_container(&self, id: &str) -> Result<Option<ContainerInspect>> {
            Ok(Some(ContainerInspect {
                id: id.to_string(),
                name: "/web".into(),
                running: true,
                config: ContainerConfig { image: "library/web:1.1.0".into(), ..Default::default() },
                host_config: HostConfig::default(),
                networks: Vec::new(),
            }))
        }

        async fn stop_container(&self, _id: &str) -> Result<()> {
            self.record("stop");
            Ok(())
        }

        async fn remove_container(&self, _id: &str) -> Result<()> {
            self.record("remove");
            Ok(())
        }

        async fn wait_removed(&self, _id: &str, _timeout: Duration) -> Result<()> {
            self.record("wait_removed");
            Ok(())
        }

        async fn create_container(&self, options: CreateContainerOptions) -> Result<String> {
            self.record(&format!("create:{}", options.config.image));
            Ok("reverted-id".to_string())
        }

        async fn start_container(&self, _id: &str) -> Result<()> {
            self.record("start");
            Ok(())
        }

        async fn connect_network(
            &self,
            _network: &str,
            _container_id: &str,
            _settings: EndpointSettings,
        ) -> Result<()> {
            Ok(())
        }

        async fn pull_image(
            &self,
            _reference: &str,
            _auth: Option<RegistryCredentials>,
            _progress: mpsc::Sender<PullProgress>,
        ) -> Result<()> {
            Ok(())
        }

        async fn remove_image(&self, _reference: &str) -> Result<()> {
            Ok(())
        }

        async fn container_health(&self, _id: &str) -> Result<HealthState> {
            self.record("health");
            // Last state repeats once the scripted sequence runs out.
            let mut health = self.health.lock().unwrap();
            Ok(match health.len() {
                0 => HealthState::Starting,
                1 => *health.front().unwrap(),
                _ => health.pop_front().unwrap(),
            })
        }

        async fn list_container_ids(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditWriter for RecordingAudit {
        async fn append(&self, entry: AuditEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn backup() -> BackupRecord {
        BackupRecord::new("c1", "web", "library/web:1.0.0", "1.0.0", None)
    }

    fn monitor(
        engine: Arc<FakeEngine>,
        events: EventBus,
        audit: Arc<RecordingAudit>,
        window: Duration,
    ) -> RollbackMonitor {
        RollbackMonitor::new(
            engine,
            events,
            audit,
            window,
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_unhealthy_reverts_to_backup_image() {
        let engine = FakeEngine::with_health(&[HealthState::Starting, HealthState::Unhealthy]);
        let events = EventBus::new();
        let audit = Arc::new(RecordingAudit::default());
        let mut subscriber = events.subscribe(vec!["update.rolled_back".to_string()]);

        monitor(engine.clone(), events, audit.clone(), Duration::from_secs(5))
            .arm("new-id".into(), "web".into(), backup())
            .await
            .unwrap();

        let calls = engine.calls();
        assert!(calls.contains(&"create:library/web:1.0.0".to_string()));
        assert!(calls.contains(&"stop".to_string()));
        assert!(calls.contains(&"start".to_string()));

        let event = tokio::time::timeout(Duration::from_millis(200), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, "update.rolled_back");
        assert_eq!(event.metadata.get("image").map(String::as_str), Some("library/web:1.0.0"));

        let entries = audit.entries.lock().unwrap();
        assert!(entries
            .iter()
            .any(|e| e.action == "rollback" && e.status == AuditStatus::Success));
    }

    #[tokio::test]
    async fn test_healthy_disarms_without_revert() {
        let engine = FakeEngine::with_health(&[HealthState::Healthy]);
        let audit = Arc::new(RecordingAudit::default());

        monitor(engine.clone(), EventBus::new(), audit.clone(), Duration::from_secs(5))
            .arm("new-id".into(), "web".into(), backup())
            .await
            .unwrap();

        let calls = engine.calls();
        assert!(calls.contains(&"health".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("create:")));
        assert!(audit.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_elapse_disarms() {
        let engine = FakeEngine::with_health(&[]);
        let audit = Arc::new(RecordingAudit::default());

        monitor(engine.clone(), EventBus::new(), audit.clone(), Duration::from_millis(40))
            .arm("new-id".into(), "web".into(), backup())
            .await
            .unwrap();

        // Stuck on Starting until the window runs out; nothing reverted.
        assert!(!engine.calls().iter().any(|c| c.starts_with("create:")));
        assert!(audit.entries.lock().unwrap().is_empty());
    }
}
