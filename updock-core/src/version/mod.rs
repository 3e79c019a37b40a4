//! Semantic-version parsing and comparison for registry tags.
//!
//! Registry tags are rarely strict semver (`v1.2`, `5-alpine`, `1.2.3-ls45`),
//! so comparisons go through a coercion layer that strips a non-numeric
//! prefix and fills in missing components.

use semver::{BuildMetadata, Prerelease, Version};

use crate::types::SemverDiff;

mod ranker;

pub use ranker::rank;
pub(crate) use ranker::{apply_transform, compile_pattern};

/// Loose version shape accepted by [`coerce`]: `N[.N[.N]][-pre][+build]`,
/// with `.` also tolerated as the prerelease separator.
const COERCE_PATTERN: &str =
    r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:[-.]([0-9A-Za-z][0-9A-Za-z.-]*?))?(?:\+([0-9A-Za-z][0-9A-Za-z.-]*))?$";

/// Leading characters of a tag before its first digit (`"v"` in `v1.2`).
/// Returns the whole tag when it contains no digit at all.
pub(crate) fn non_numeric_prefix(tag: &str) -> &str {
    match tag.find(|c: char| c.is_ascii_digit()) {
        Some(idx) => &tag[..idx],
        None => tag,
    }
}

/// Number of leading dot-separated numeric segments in the version part of a
/// tag (`1.2` has two, `1.2.1` three). Used to avoid comparing `1.2` against
/// `1.2.1`, which are different tagging schemes, not different versions.
pub(crate) fn numeric_segment_count(tag: &str) -> usize {
    let body = &tag[non_numeric_prefix(tag).len()..];
    let core = body.split(['-', '+']).next().unwrap_or("");
    core.split('.')
        .take_while(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .count()
}

/// Coerce a tag into a [`Version`], tolerating a non-numeric prefix and
/// missing minor/patch components. Returns `None` for tags with no usable
/// version shape.
pub fn coerce(tag: &str) -> Option<Version> {
    let body = &tag[non_numeric_prefix(tag).len()..];
    if body.is_empty() {
        return None;
    }
    if let Ok(version) = Version::parse(body) {
        return Some(version);
    }

    let re = regex::Regex::new(COERCE_PATTERN).ok()?;
    let caps = re.captures(body)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let patch = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let pre = match caps.get(4) {
        Some(m) => Prerelease::new(m.as_str()).ok()?,
        None => Prerelease::EMPTY,
    };
    let build = match caps.get(5) {
        Some(m) => BuildMetadata::new(m.as_str()).ok()?,
        None => BuildMetadata::EMPTY,
    };
    Some(Version { major, minor, patch, pre, build })
}

/// Whether a tag has a usable semantic-version shape.
pub fn is_semver(tag: &str) -> bool {
    coerce(tag).is_some()
}

/// Severity of the change between two versions, by first differing
/// component. Equal versions (including versions differing only in build
/// metadata) yield `Unknown`.
pub fn diff(local: &Version, remote: &Version) -> SemverDiff {
    if local.major != remote.major {
        SemverDiff::Major
    } else if local.minor != remote.minor {
        SemverDiff::Minor
    } else if local.patch != remote.patch {
        SemverDiff::Patch
    } else if local.pre != remote.pre {
        SemverDiff::Prerelease
    } else {
        SemverDiff::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_full_semver() {
        let v = coerce("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
    }

    #[test]
    fn test_coerce_prefix_and_partial() {
        let v = coerce("v1.2").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 0));
        let v = coerce("release-5").unwrap();
        assert_eq!(v.major, 5);
    }

    #[test]
    fn test_coerce_prerelease() {
        let v = coerce("1.2.3-alpha.1").unwrap();
        assert_eq!(v.pre.as_str(), "alpha.1");
        assert!(coerce("1.2.3-alpha.1").unwrap() < coerce("1.2.3").unwrap());
    }

    #[test]
    fn test_coerce_rejects_non_versions() {
        assert!(coerce("latest").is_none());
        assert!(coerce("stable").is_none());
        assert!(coerce("").is_none());
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(numeric_segment_count("1.2"), 2);
        assert_eq!(numeric_segment_count("v1.2.1"), 3);
        assert_eq!(numeric_segment_count("5-alpine"), 1);
    }

    #[test]
    fn test_diff_by_first_differing_component() {
        let d = |a: &str, b: &str| diff(&coerce(a).unwrap(), &coerce(b).unwrap());
        assert_eq!(d("1.0.0", "2.0.0"), SemverDiff::Major);
        assert_eq!(d("1.0.0", "1.1.0"), SemverDiff::Minor);
        assert_eq!(d("1.0.0", "1.0.1"), SemverDiff::Patch);
        assert_eq!(d("1.0.0-rc1", "1.0.0"), SemverDiff::Prerelease);
    }

    #[test]
    fn test_diff_build_metadata_only_is_unknown() {
        let d = diff(&coerce("1.0.0+build1").unwrap(), &coerce("1.0.0+build2").unwrap());
        assert_eq!(d, SemverDiff::Unknown);
    }
}
