//! Container engine seam.
//!
//! The engine client itself (Docker/Podman API plumbing) lives outside this
//! crate; the orchestrator consumes it through the [`ContainerEngine`]
//! trait. The inspection types carry exactly what container replacement
//! needs to clone a configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::registry::RegistryCredentials;

/// Static IP assignment for an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpamConfig {
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub link_local_ips: Vec<String>,
}

/// Per-network endpoint settings of a container.
///
/// Some fields are server-assigned (ids, gateway, IP) and must be stripped
/// before reusing the settings on a new container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSettings {
    pub aliases: Vec<String>,
    pub links: Vec<String>,
    pub ipam_config: Option<IpamConfig>,
    pub driver_opts: HashMap<String, String>,
    pub mac_address: Option<String>,
    pub network_id: Option<String>,
    pub endpoint_id: Option<String>,
    pub gateway: Option<String>,
    pub ip_address: Option<String>,
}

/// A network attachment, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub name: String,
    pub settings: EndpointSettings,
}

/// Container health check definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckConfig {
    pub test: Vec<String>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

/// Application-level container configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub labels: HashMap<String, String>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub exposed_ports: Vec<String>,
    pub healthcheck: Option<HealthcheckConfig>,
}

/// Host-level container configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// `bridge`, a network name, or `container:<id>` for a shared namespace.
    pub network_mode: Option<String>,
    pub auto_remove: bool,
    pub binds: Vec<String>,
    pub port_bindings: HashMap<String, Vec<String>>,
    pub restart_policy: Option<String>,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
}

/// Inspection snapshot of a live container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub networks: Vec<NetworkAttachment>,
}

/// Creation request for a replacement container. Only one network can be
/// bound at creation time; remaining attachments need explicit connects.
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub name: String,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub network: Option<NetworkAttachment>,
}

/// One streamed pull progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullProgress {
    pub layer: Option<String>,
    pub status: String,
    pub detail: Option<String>,
}

/// Health state reported by the engine for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
    /// No health check defined.
    None,
}

/// Contract implemented by engine clients.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Inspect a container; `None` when it no longer exists.
    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerInspect>>;

    async fn stop_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Wait for an auto-remove container to disappear, bounded by `timeout`.
    async fn wait_removed(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Create a container; returns the new container id.
    async fn create_container(&self, options: CreateContainerOptions) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        settings: EndpointSettings,
    ) -> Result<()>;

    /// Pull an image, streaming progress events into `progress`. The stream
    /// closes when the pull finishes.
    async fn pull_image(
        &self,
        reference: &str,
        auth: Option<RegistryCredentials>,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<()>;

    /// Remove an image reference. Best-effort callers swallow failures.
    async fn remove_image(&self, reference: &str) -> Result<()>;

    /// Current health state of a container.
    async fn container_health(&self, id: &str) -> Result<HealthState>;

    /// Ids of all containers currently known to the engine.
    async fn list_container_ids(&self) -> Result<Vec<String>>;
}
