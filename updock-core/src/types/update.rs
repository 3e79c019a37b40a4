//! Classification of a detected change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nature of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The remote tag differs from the local tag.
    Tag,
    /// Tags are equal but the content digest moved.
    Digest,
    /// Nothing comparable was detected.
    #[default]
    Unknown,
}

impl ChangeKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Tag => "tag",
            ChangeKind::Digest => "digest",
            ChangeKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a tag change under semantic-version ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SemverDiff {
    Major,
    Minor,
    Patch,
    Prerelease,
    #[default]
    Unknown,
}

impl SemverDiff {
    /// Parse a severity from string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "major" => SemverDiff::Major,
            "minor" => SemverDiff::Minor,
            "patch" => SemverDiff::Patch,
            "prerelease" => SemverDiff::Prerelease,
            _ => SemverDiff::Unknown,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SemverDiff::Major => "major",
            SemverDiff::Minor => "minor",
            SemverDiff::Patch => "patch",
            SemverDiff::Prerelease => "prerelease",
            SemverDiff::Unknown => "unknown",
        }
    }

    /// Numeric rank used by threshold comparison (major > minor > patch > prerelease).
    pub(crate) fn rank(&self) -> u8 {
        match self {
            SemverDiff::Major => 3,
            SemverDiff::Minor => 2,
            SemverDiff::Patch => 1,
            SemverDiff::Prerelease => 0,
            SemverDiff::Unknown => 0,
        }
    }
}

impl fmt::Display for SemverDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a detected change between the local image and the
/// most recent watch result.
///
/// Recomputed every cycle; never persisted on its own. The serialized field
/// names are read by downstream UI and audit consumers and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKind {
    pub kind: ChangeKind,
    pub local_value: Option<String>,
    pub remote_value: Option<String>,
    pub semver_diff: SemverDiff,
}

impl UpdateKind {
    /// No comparable change. `unknown` kind always carries an `unknown` diff.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// A tag-kind change. Values are the raw, pre-transform tags.
    pub fn tag_change(local: &str, remote: &str, diff: SemverDiff) -> Self {
        Self {
            kind: ChangeKind::Tag,
            local_value: Some(local.to_string()),
            remote_value: Some(remote.to_string()),
            semver_diff: diff,
        }
    }

    /// A digest-kind change. Digest moves carry no semver severity.
    pub fn digest_change(local: &str, remote: &str) -> Self {
        Self {
            kind: ChangeKind::Digest,
            local_value: Some(local.to_string()),
            remote_value: Some(remote.to_string()),
            semver_diff: SemverDiff::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_implies_unknown_diff() {
        let kind = UpdateKind::unknown();
        assert_eq!(kind.kind, ChangeKind::Unknown);
        assert_eq!(kind.semver_diff, SemverDiff::Unknown);
    }

    #[test]
    fn test_serialized_field_names() {
        let kind = UpdateKind::tag_change("1.0.0", "2.0.0", SemverDiff::Major);
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "tag");
        assert_eq!(json["localValue"], "1.0.0");
        assert_eq!(json["remoteValue"], "2.0.0");
        assert_eq!(json["semverDiff"], "major");
    }

    #[test]
    fn test_semver_diff_parse() {
        assert_eq!(SemverDiff::parse("MAJOR"), SemverDiff::Major);
        assert_eq!(SemverDiff::parse("patch"), SemverDiff::Patch);
        assert_eq!(SemverDiff::parse("garbage"), SemverDiff::Unknown);
    }
}
