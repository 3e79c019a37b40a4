//! Tag filter/ranker: turns the raw registry tag list into an ordered set
//! of upgrade candidates for one container.

use regex::Regex;
use semver::Version;
use tracing::warn;

use crate::types::ContainerRecord;

use super::{coerce, non_numeric_prefix, numeric_segment_count};

/// Patterns longer than this are rejected outright to bound matching cost.
const MAX_PATTERN_LEN: usize = 256;

/// Compile an operator-supplied pattern, logging and ignoring anything
/// invalid or oversized rather than failing the watch cycle.
pub(crate) fn compile_pattern(kind: &str, pattern: &str) -> Option<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        warn!(kind, len = pattern.len(), "Tag pattern exceeds maximum length, ignoring");
        return None;
    }
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(kind, pattern, error = %e, "Invalid tag pattern, ignoring");
            None
        }
    }
}

/// Apply a `"<regex> => <replacement>"` transform rule to a tag.
///
/// Invalid rules are logged and ignored; the tag passes through unchanged.
pub(crate) fn apply_transform(rule: Option<&str>, tag: &str) -> String {
    let Some(rule) = rule else {
        return tag.to_string();
    };
    let Some((pattern, replacement)) = rule.split_once("=>") else {
        warn!(rule, "Transform rule is missing '=>', ignoring");
        return tag.to_string();
    };
    match compile_pattern("transform", pattern.trim()) {
        Some(re) => re.replace(tag, replacement.trim()).into_owned(),
        None => tag.to_string(),
    }
}

/// Raw content hashes (git shas, digests) masquerading as tags.
fn looks_like_content_hash(tag: &str) -> bool {
    tag.len() >= 12 && tag.chars().all(|c| c.is_ascii_hexdigit())
}

/// Cosign-style signature and attestation tags.
fn is_signature_tag(tag: &str) -> bool {
    tag.ends_with(".sig") || tag.ends_with(".att")
}

/// Rank the available registry tags into an ordered candidate list,
/// descending by semantic-version precedence. The first element, if any, is
/// the adopted candidate.
///
/// When the current tag is not semantic and no include filter is set there
/// is no safe ordering to compute and the result is empty. With an include
/// filter, ranking degrades to an advisory suggestion over whatever tags do
/// parse (recovery mode).
pub fn rank(container: &ContainerRecord, available_tags: &[String]) -> Vec<String> {
    let name = &container.name;
    let include = container.include_tags.as_deref().and_then(|p| compile_pattern("include", p));
    let exclude = container.exclude_tags.as_deref().and_then(|p| compile_pattern("exclude", p));
    let transform = container.transform_tags.as_deref();

    let mut tags: Vec<String> = available_tags
        .iter()
        .filter(|t| match &include {
            Some(re) => re.is_match(t),
            None => !looks_like_content_hash(t),
        })
        .filter(|t| exclude.as_ref().map_or(true, |re| !re.is_match(t)))
        .filter(|t| !is_signature_tag(t))
        .cloned()
        .collect();

    if tags.is_empty() {
        warn!(container = %name, "No tags remaining after include/exclude filtering");
        return Vec::new();
    }

    let current = &container.image.tag.value;
    let comparable = |tag: &str| coerce(&apply_transform(transform, tag));

    let Some(current_version) = comparable(current) else {
        if include.is_none() {
            warn!(
                container = %name,
                tag = %current,
                "Current tag is not a semantic version and no include filter is set, \
                 cannot rank candidates"
            );
            return Vec::new();
        }
        // Recovery mode: the live tag cannot be compared directly, surface a
        // best-effort suggestion from the tags that do parse.
        let mut candidates: Vec<(String, Version)> =
            tags.into_iter().filter_map(|t| comparable(&t).map(|v| (t, v))).collect();
        if candidates.is_empty() {
            warn!(
                container = %name,
                "Include filter matched tags but none parse as semantic versions"
            );
            return Vec::new();
        }
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        return candidates.into_iter().map(|(t, _)| t).collect();
    };

    // Only compare within the current tagging scheme: same non-numeric
    // prefix (or digit-leading when prefixless), same segment count.
    let prefix = non_numeric_prefix(current);
    if prefix.is_empty() {
        tags.retain(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()));
    } else {
        tags.retain(|t| t.starts_with(prefix));
    }
    if tags.is_empty() {
        warn!(container = %name, prefix, "No tags share the current tag's prefix");
        return Vec::new();
    }

    let segments = numeric_segment_count(current);
    let mut candidates: Vec<(String, Version)> = tags
        .into_iter()
        .filter(|t| numeric_segment_count(t) == segments)
        .filter_map(|t| comparable(&t).map(|v| (t, v)))
        .filter(|(_, v)| *v > current_version)
        .collect();

    if candidates.is_empty() {
        warn!(
            container = %name,
            current = %current,
            "No semantic-version tags greater than the current tag"
        );
        return Vec::new();
    }

    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.into_iter().map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageTag;

    fn container(tag: &str) -> ContainerRecord {
        let mut record = ContainerRecord { name: "web".into(), ..Default::default() };
        record.image.tag = ImageTag { value: tag.into(), is_semver: coerce(tag).is_some() };
        record
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_non_semver_without_filter_yields_nothing() {
        let c = container("latest");
        assert!(rank(&c, &tags(&["1.0.0", "2.0.0"])).is_empty());
    }

    #[test]
    fn test_candidates_strictly_greater_descending() {
        let c = container("1.2.0");
        let ranked = rank(&c, &tags(&["1.0.0", "1.2.0", "1.3.0", "2.0.0"]));
        assert_eq!(ranked, vec!["2.0.0".to_string(), "1.3.0".to_string()]);
    }

    #[test]
    fn test_prefix_restriction() {
        let c = container("v1.0.0");
        let ranked = rank(&c, &tags(&["v1.1.0", "1.2.0", "v2.0.0"]));
        assert_eq!(ranked, vec!["v2.0.0".to_string(), "v1.1.0".to_string()]);
    }

    #[test]
    fn test_prefixless_requires_digit_leading_tags() {
        let c = container("1.0.0");
        let ranked = rank(&c, &tags(&["v1.1.0", "1.2.0"]));
        assert_eq!(ranked, vec!["1.2.0".to_string()]);
    }

    #[test]
    fn test_segment_count_must_match() {
        let c = container("1.2");
        let ranked = rank(&c, &tags(&["1.3", "1.2.1", "1.4.0"]));
        assert_eq!(ranked, vec!["1.3".to_string()]);
    }

    #[test]
    fn test_hash_and_signature_tags_dropped() {
        let c = container("1.0.0");
        let ranked = rank(
            &c,
            &tags(&["1.1.0", "0123456789abcdef", "sha256-deadbeef.sig"]),
        );
        assert_eq!(ranked, vec!["1.1.0".to_string()]);
    }

    #[test]
    fn test_exclude_filter() {
        let mut c = container("1.0.0");
        c.exclude_tags = Some("-rc".into());
        let ranked = rank(&c, &tags(&["1.1.0", "1.2.0-rc1"]));
        assert_eq!(ranked, vec!["1.1.0".to_string()]);
    }

    #[test]
    fn test_recovery_mode_with_include_filter() {
        let mut c = container("latest");
        c.include_tags = Some(r"^\d+\.\d+\.\d+$".into());
        let ranked = rank(&c, &tags(&["1.0.0", "2.0.0", "latest"]));
        assert_eq!(ranked, vec!["2.0.0".to_string(), "1.0.0".to_string()]);
    }

    #[test]
    fn test_oversized_pattern_ignored() {
        let mut c = container("1.0.0");
        c.include_tags = Some("a".repeat(300));
        // Pattern ignored, hash filtering applies instead.
        let ranked = rank(&c, &tags(&["1.1.0"]));
        assert_eq!(ranked, vec!["1.1.0".to_string()]);
    }

    #[test]
    fn test_transform_applied_before_comparison() {
        let mut c = container("1.2.3-ls44");
        c.transform_tags = Some(r"^(\d+\.\d+\.\d+)-ls\d+$ => $1".into());
        let ranked = rank(&c, &tags(&["1.2.3-ls45", "1.2.4-ls50"]));
        // 1.2.3-ls45 transforms to 1.2.3, equal to current, so not greater.
        assert_eq!(ranked, vec!["1.2.4-ls50".to_string()]);
    }
}
