//! Container replacement: cloning a live container's configuration onto a
//! new image while stripping server-assigned state.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{
    ContainerEngine, ContainerInspect, CreateContainerOptions, EndpointSettings,
    NetworkAttachment,
};
use crate::error::Result;

/// Replacement plan derived from an inspection snapshot.
#[derive(Debug, Clone)]
pub(crate) struct CloneSpec {
    pub create: CreateContainerOptions,
    /// Networks beyond the one bound at creation time, in declaration order.
    pub remaining_networks: Vec<NetworkAttachment>,
    pub was_running: bool,
}

/// An alias equal to a prefix of the old container id is the engine's
/// short-hash alias for that container; carrying it over would alias the
/// new container under the old id.
fn is_stale_alias(old_container_id: &str, alias: &str) -> bool {
    !alias.is_empty() && old_container_id.starts_with(alias)
}

/// Strip ephemeral, server-assigned endpoint state, keeping only the fields
/// that are stable across recreation.
pub(crate) fn sanitize_endpoint(
    old_container_id: &str,
    settings: &EndpointSettings,
) -> EndpointSettings {
    EndpointSettings {
        aliases: settings
            .aliases
            .iter()
            .filter(|alias| !is_stale_alias(old_container_id, alias))
            .cloned()
            .collect(),
        links: settings.links.clone(),
        ipam_config: settings.ipam_config.clone(),
        driver_opts: settings.driver_opts.clone(),
        mac_address: settings.mac_address.clone(),
        network_id: None,
        endpoint_id: None,
        gateway: None,
        ip_address: None,
    }
}

/// Build the creation plan for a replacement container running
/// `target_image` with the old container's configuration.
pub(crate) fn build_clone_spec(inspect: &ContainerInspect, target_image: &str) -> CloneSpec {
    let mut config = inspect.config.clone();
    config.image = target_image.to_string();

    let host_config = inspect.host_config.clone();

    // In a shared network namespace hostname and exposed ports are
    // inherited from the owning container, not owned by this one.
    let shared_namespace = host_config
        .network_mode
        .as_deref()
        .is_some_and(|mode| mode.starts_with("container:"));
    if shared_namespace {
        config.hostname = None;
        config.exposed_ports.clear();
    }

    let mut endpoints: Vec<NetworkAttachment> = inspect
        .networks
        .iter()
        .map(|attachment| NetworkAttachment {
            name: attachment.name.clone(),
            settings: sanitize_endpoint(&inspect.id, &attachment.settings),
        })
        .collect();

    // Only one network can be bound at creation time: the one matching the
    // host network-mode setting, else the first.
    let primary_index = host_config
        .network_mode
        .as_deref()
        .and_then(|mode| endpoints.iter().position(|e| e.name == mode))
        .unwrap_or(0);
    let network = if endpoints.is_empty() {
        None
    } else {
        Some(endpoints.remove(primary_index))
    };

    CloneSpec {
        create: CreateContainerOptions {
            name: inspect.name.trim_start_matches('/').to_string(),
            config,
            host_config,
            network,
        },
        remaining_networks: endpoints,
        was_running: inspect.running,
    }
}

/// Stop, remove and recreate a container on `target_image`, reattaching
/// secondary networks in declaration order and restarting only if the
/// original was running. Returns the new container id.
pub(crate) async fn replace_container(
    engine: &Arc<dyn ContainerEngine>,
    inspect: &ContainerInspect,
    target_image: &str,
    auto_remove_timeout: Duration,
) -> Result<String> {
    if inspect.running {
        engine.stop_container(&inspect.id).await?;
    }
    if inspect.host_config.auto_remove {
        // The engine removes the container itself; wait for it to go.
        engine.wait_removed(&inspect.id, auto_remove_timeout).await?;
    } else {
        engine.remove_container(&inspect.id).await?;
    }

    let spec = build_clone_spec(inspect, target_image);
    let was_running = spec.was_running;
    let new_id = engine.create_container(spec.create).await?;
    for attachment in spec.remaining_networks {
        engine.connect_network(&attachment.name, &new_id, attachment.settings).await?;
    }
    if was_running {
        engine.start_container(&new_id).await?;
    }
    Ok(new_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerConfig, HostConfig, IpamConfig};

    fn inspect_with_networks(networks: Vec<NetworkAttachment>) -> ContainerInspect {
        ContainerInspect {
            id: "0123456789abcdef0123".into(),
            name: "/web".into(),
            running: true,
            config: ContainerConfig {
                image: "nginx:1.25".into(),
                hostname: Some("web".into()),
                exposed_ports: vec!["80/tcp".into()],
                ..Default::default()
            },
            host_config: HostConfig::default(),
            networks,
        }
    }

    #[test]
    fn test_stale_short_hash_alias_dropped() {
        let settings = EndpointSettings {
            aliases: vec!["0123456789ab".into(), "web".into()],
            ..Default::default()
        };
        let sanitized = sanitize_endpoint("0123456789abcdef0123", &settings);
        assert_eq!(sanitized.aliases, vec!["web".to_string()]);
    }

    #[test]
    fn test_server_assigned_fields_stripped() {
        let settings = EndpointSettings {
            aliases: vec!["web".into()],
            mac_address: Some("02:42:ac:11:00:02".into()),
            network_id: Some("netid".into()),
            endpoint_id: Some("epid".into()),
            gateway: Some("172.17.0.1".into()),
            ip_address: Some("172.17.0.2".into()),
            ipam_config: Some(IpamConfig {
                ipv4_address: Some("172.17.0.2".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let sanitized = sanitize_endpoint("deadbeef", &settings);
        assert!(sanitized.network_id.is_none());
        assert!(sanitized.endpoint_id.is_none());
        assert!(sanitized.gateway.is_none());
        assert!(sanitized.ip_address.is_none());
        // Stable fields survive.
        assert_eq!(sanitized.mac_address.as_deref(), Some("02:42:ac:11:00:02"));
        assert!(sanitized.ipam_config.is_some());
    }

    #[test]
    fn test_primary_network_matches_network_mode() {
        let mut inspect = inspect_with_networks(vec![
            NetworkAttachment { name: "frontend".into(), ..Default::default() },
            NetworkAttachment { name: "backend".into(), ..Default::default() },
        ]);
        inspect.host_config.network_mode = Some("backend".into());

        let spec = build_clone_spec(&inspect, "nginx:1.26");
        assert_eq!(spec.create.network.unwrap().name, "backend");
        assert_eq!(spec.remaining_networks.len(), 1);
        assert_eq!(spec.remaining_networks[0].name, "frontend");
    }

    #[test]
    fn test_first_network_when_mode_unmatched() {
        let inspect = inspect_with_networks(vec![
            NetworkAttachment { name: "frontend".into(), ..Default::default() },
            NetworkAttachment { name: "backend".into(), ..Default::default() },
        ]);
        let spec = build_clone_spec(&inspect, "nginx:1.26");
        assert_eq!(spec.create.network.unwrap().name, "frontend");
        assert_eq!(spec.remaining_networks[0].name, "backend");
    }

    #[test]
    fn test_shared_namespace_drops_hostname_and_ports() {
        let mut inspect = inspect_with_networks(Vec::new());
        inspect.host_config.network_mode = Some("container:otherid".into());

        let spec = build_clone_spec(&inspect, "nginx:1.26");
        assert!(spec.create.config.hostname.is_none());
        assert!(spec.create.config.exposed_ports.is_empty());
    }

    #[test]
    fn test_image_swapped_and_name_trimmed() {
        let inspect = inspect_with_networks(Vec::new());
        let spec = build_clone_spec(&inspect, "nginx:1.26");
        assert_eq!(spec.create.config.image, "nginx:1.26");
        assert_eq!(spec.create.name, "web");
        assert!(spec.was_running);
    }
}
