//! Remote digest resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, UpdockError};
use crate::types::ImageDescriptor;

use super::{ManifestDigest, RegistryProvider};

/// Outcome of a remote digest lookup.
#[derive(Debug, Clone)]
pub struct DigestResolution {
    pub digest: String,
    /// Always taken from the first manifest response, even when a second
    /// lookup was needed.
    pub created: Option<DateTime<Utc>>,
}

/// Resolve the remote digest for an image.
///
/// Queries `top_candidate` when the ranker produced one, else the current
/// tag. A schema 2 response is a manifest-list digest, not the runnable
/// image's digest; a second lookup parameterized by the previously stored
/// repo digest obtains the concrete one. Schema 1 responses need no second
/// call.
///
/// Callers only invoke this when digest watching is enabled and a repo
/// digest is known from inspection.
pub async fn resolve_digest(
    provider: &Arc<dyn RegistryProvider>,
    image: &ImageDescriptor,
    top_candidate: Option<&str>,
) -> Result<DigestResolution> {
    let reference = top_candidate.unwrap_or(&image.tag.value);

    let first: ManifestDigest =
        provider.get_image_manifest_digest(image, reference, None).await?;
    let created = first.created;

    let digest = if first.schema_version == 2 {
        let repo_digest = image.digest.repo_digest.as_deref().ok_or_else(|| {
            UpdockError::DigestUnavailable {
                image: image.display_ref(),
                reason: "manifest list returned but no repo digest is known".into(),
            }
        })?;
        debug!(
            image = %image.display_ref(),
            reference,
            "Manifest list digest received, resolving concrete image digest"
        );
        provider
            .get_image_manifest_digest(image, reference, Some(repo_digest))
            .await?
            .digest
    } else {
        first.digest
    };

    Ok(DigestResolution { digest, created })
}
