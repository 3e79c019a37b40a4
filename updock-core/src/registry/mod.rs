//! Registry provider seam.
//!
//! Registry HTTP clients live outside this crate; the pipeline consumes them
//! through the [`RegistryProvider`] trait. Providers are collected into a
//! [`ProviderRegistry`] built once at startup and threaded through
//! explicitly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::types::ImageDescriptor;

mod digest;

pub use digest::{resolve_digest, DigestResolution};

/// Pull credentials for the engine.
#[derive(Debug, Clone, Default)]
pub struct RegistryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

/// Manifest digest response from a registry.
#[derive(Debug, Clone)]
pub struct ManifestDigest {
    pub digest: String,
    /// Image creation timestamp, when the manifest carries one.
    pub created: Option<DateTime<Utc>>,
    /// Manifest schema version. Schema 2 responses may describe a manifest
    /// list rather than a runnable image.
    pub schema_version: u32,
}

/// Contract implemented by registry clients (Docker Hub, GHCR, ...).
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Provider id, used in trigger references and logs (e.g. `hub`).
    fn id(&self) -> &str;

    /// List all tags of the image's repository.
    async fn get_tags(&self, image: &ImageDescriptor) -> Result<Vec<String>>;

    /// Fetch the manifest digest for `reference` (a tag). When
    /// `repo_digest_hint` is given, resolve the concrete image digest inside
    /// a manifest list instead of the list digest itself.
    async fn get_image_manifest_digest(
        &self,
        image: &ImageDescriptor,
        reference: &str,
        repo_digest_hint: Option<&str>,
    ) -> Result<ManifestDigest>;

    /// Credentials for pulling through the engine, if any.
    async fn get_auth_pull(&self) -> Result<Option<RegistryCredentials>>;

    /// Fully-qualified image reference for a tag (`:tag`) or digest
    /// (`@sha256:...`).
    fn get_image_full_name(&self, image: &ImageDescriptor, tag_or_digest: &str) -> String;

    /// Normalize registry-specific quirks of an image descriptor.
    fn normalize_image(&self, image: ImageDescriptor) -> ImageDescriptor;

    /// Whether this provider serves the image's registry.
    fn matches(&self, image: &ImageDescriptor) -> bool;
}

/// Dependency-injection boundary over the configured providers.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn RegistryProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    /// Register a provider. Lookup order follows registration order.
    pub fn register(&mut self, provider: Arc<dyn RegistryProvider>) {
        self.providers.push(provider);
    }

    /// Find the first provider matching the image's registry.
    pub fn find(&self, image: &ImageDescriptor) -> Option<Arc<dyn RegistryProvider>> {
        self.providers.iter().find(|p| p.matches(image)).cloned()
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn RegistryProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
