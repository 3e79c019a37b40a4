//! Change classifier: pure, deterministic comparison of the local image
//! against the most recent watch result, followed by policy suppression.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{ChangeKind, ContainerRecord, SemverDiff, UpdateKind, UpdatePolicy};
use crate::version;

/// Classifier output. `update_kind` stays visible for UI and audit readers
/// even when policy suppressed the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub update_available: bool,
    pub update_kind: UpdateKind,
}

/// Classify the change recorded on a container. No I/O; calling this twice
/// on an unmodified record yields the same result.
pub fn classify(container: &ContainerRecord) -> Classification {
    let update_kind = detect_change(container);
    let update_available = match update_kind.kind {
        ChangeKind::Unknown => false,
        _ => !suppressed(&container.update_policy, &update_kind),
    };
    Classification { update_available, update_kind }
}

/// Compare local and remote values. Tag changes take priority over digest
/// changes; digest comparison only happens when the (post-transform) tags
/// are equal and digest watching is enabled.
fn detect_change(container: &ContainerRecord) -> UpdateKind {
    let Some(result) = &container.result else {
        return UpdateKind::unknown();
    };

    let local_tag = container.image.tag.value.as_str();
    let remote_tag = result.tag.as_str();

    if !local_tag.is_empty() && !remote_tag.is_empty() {
        let transform = container.transform_tags.as_deref();
        let local = version::apply_transform(transform, local_tag);
        let remote = version::apply_transform(transform, remote_tag);

        if local != remote {
            let diff = match (version::coerce(&local), version::coerce(&remote)) {
                (Some(l), Some(r)) => version::diff(&l, &r),
                _ => SemverDiff::Unknown,
            };
            // Raw, pre-transform values are what operators recognize.
            return UpdateKind::tag_change(local_tag, remote_tag, diff);
        }
    }

    if container.image.digest.watch_enabled {
        if let (Some(local), Some(remote)) =
            (container.image.digest.resolved_value.as_deref(), result.digest.as_deref())
        {
            if local != remote {
                return UpdateKind::digest_change(local, remote);
            }
        }
    }

    UpdateKind::unknown()
}

/// Whether operator policy suppresses this update. Suppression affects only
/// `update_available`, never the kind itself.
fn suppressed(policy: &UpdatePolicy, kind: &UpdateKind) -> bool {
    if snoozed(policy.snooze_until.as_deref()) {
        return true;
    }
    let Some(remote) = kind.remote_value.as_deref() else {
        return false;
    };
    match kind.kind {
        ChangeKind::Tag => policy.skip_tags.iter().any(|t| t == remote),
        ChangeKind::Digest => policy.skip_digests.iter().any(|d| d == remote),
        ChangeKind::Unknown => false,
    }
}

/// A snooze only suppresses when it parses as RFC 3339 and lies in the
/// future; past or unparseable values are ignored.
fn snoozed(snooze_until: Option<&str>) -> bool {
    let Some(raw) = snooze_until else {
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(instant) => instant.with_timezone(&Utc) > Utc::now(),
        Err(e) => {
            debug!(snooze = raw, error = %e, "Ignoring unparseable snooze timestamp");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageTag, UpdateResult};
    use chrono::Duration;

    fn container(local_tag: &str, remote_tag: &str) -> ContainerRecord {
        let mut record = ContainerRecord { name: "web".into(), ..Default::default() };
        record.image.tag = ImageTag {
            value: local_tag.into(),
            is_semver: version::is_semver(local_tag),
        };
        record.result = Some(UpdateResult { tag: remote_tag.into(), ..Default::default() });
        record
    }

    #[test]
    fn test_major_tag_change() {
        let c = container("1.0.0", "2.0.0");
        let out = classify(&c);
        assert!(out.update_available);
        assert_eq!(out.update_kind.kind, ChangeKind::Tag);
        assert_eq!(out.update_kind.local_value.as_deref(), Some("1.0.0"));
        assert_eq!(out.update_kind.remote_value.as_deref(), Some("2.0.0"));
        assert_eq!(out.update_kind.semver_diff, SemverDiff::Major);
    }

    #[test]
    fn test_missing_result_is_unknown() {
        let mut c = container("1.0.0", "2.0.0");
        c.result = None;
        let out = classify(&c);
        assert!(!out.update_available);
        assert_eq!(out.update_kind, UpdateKind::unknown());
    }

    #[test]
    fn test_idempotent() {
        let c = container("1.0.0", "1.2.0");
        assert_eq!(classify(&c), classify(&c));
    }

    #[test]
    fn test_tag_change_preferred_over_digest() {
        let mut c = container("1.0.0", "1.0.1");
        c.image.digest.watch_enabled = true;
        c.image.digest.resolved_value = Some("sha256:old".into());
        c.result.as_mut().unwrap().digest = Some("sha256:new".into());
        let out = classify(&c);
        assert_eq!(out.update_kind.kind, ChangeKind::Tag);
    }

    #[test]
    fn test_digest_change_when_tags_equal() {
        let mut c = container("latest", "latest");
        c.image.digest.watch_enabled = true;
        c.image.digest.resolved_value = Some("sha256:old".into());
        c.result.as_mut().unwrap().digest = Some("sha256:new".into());
        let out = classify(&c);
        assert!(out.update_available);
        assert_eq!(out.update_kind.kind, ChangeKind::Digest);
        assert_eq!(out.update_kind.semver_diff, SemverDiff::Unknown);
    }

    #[test]
    fn test_digest_watch_disabled_means_unknown() {
        let mut c = container("latest", "latest");
        c.image.digest.resolved_value = Some("sha256:old".into());
        c.result.as_mut().unwrap().digest = Some("sha256:new".into());
        let out = classify(&c);
        assert!(!out.update_available);
        assert_eq!(out.update_kind.kind, ChangeKind::Unknown);
    }

    #[test]
    fn test_transform_equalizes_tags() {
        let mut c = container("1.2.3-ls44", "1.2.3-ls45");
        c.transform_tags = Some(r"^(\d+\.\d+\.\d+)-ls\d+$ => $1".into());
        let out = classify(&c);
        // Post-transform the tags are equal; no digest data, so unknown.
        assert_eq!(out.update_kind.kind, ChangeKind::Unknown);
    }

    #[test]
    fn test_build_metadata_only_diff_is_unknown_severity() {
        let c = container("1.0.0+build1", "1.0.0+build2");
        let out = classify(&c);
        assert_eq!(out.update_kind.kind, ChangeKind::Tag);
        assert_eq!(out.update_kind.semver_diff, SemverDiff::Unknown);
    }

    #[test]
    fn test_skip_tags_suppresses_but_keeps_kind() {
        let mut c = container("1.0.0", "1.0.1");
        c.update_policy.skip_tags = vec!["1.0.1".into()];
        let out = classify(&c);
        assert!(!out.update_available);
        assert_eq!(out.update_kind.kind, ChangeKind::Tag);
        assert_eq!(out.update_kind.semver_diff, SemverDiff::Patch);
    }

    #[test]
    fn test_skip_digest_suppresses_digest_kind() {
        let mut c = container("latest", "latest");
        c.image.digest.watch_enabled = true;
        c.image.digest.resolved_value = Some("sha256:old".into());
        c.result.as_mut().unwrap().digest = Some("sha256:new".into());
        c.update_policy.skip_digests = vec!["sha256:new".into()];
        let out = classify(&c);
        assert!(!out.update_available);
        assert_eq!(out.update_kind.kind, ChangeKind::Digest);
    }

    #[test]
    fn test_future_snooze_suppresses() {
        let mut c = container("1.0.0", "2.0.0");
        c.update_policy.snooze_until = Some((Utc::now() + Duration::hours(1)).to_rfc3339());
        let out = classify(&c);
        assert!(!out.update_available);
        assert_eq!(out.update_kind.kind, ChangeKind::Tag);
    }

    #[test]
    fn test_past_or_invalid_snooze_ignored() {
        let mut c = container("1.0.0", "2.0.0");
        c.update_policy.snooze_until = Some((Utc::now() - Duration::hours(1)).to_rfc3339());
        assert!(classify(&c).update_available);

        c.update_policy.snooze_until = Some("not-a-timestamp".into());
        assert!(classify(&c).update_available);
    }
}
