//! Trigger gate: decides, per registered trigger, whether a classified
//! change should fire.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::types::{ChangeKind, ContainerRecord, SemverDiff, UpdateKind};

pub mod template;

/// Severity level named by a threshold spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLevel {
    Major,
    Minor,
    Patch,
}

impl ThresholdLevel {
    fn rank(&self) -> u8 {
        match self {
            ThresholdLevel::Major => 3,
            ThresholdLevel::Minor => 2,
            ThresholdLevel::Patch => 1,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ThresholdLevel::Major => "major",
            ThresholdLevel::Minor => "minor",
            ThresholdLevel::Patch => "patch",
        }
    }
}

/// Trigger-level policy controlling the minimum severity required to fire.
///
/// Specs: `all`, `digest`, `<level>`, `<level>-only`, `<level>-no-digest`,
/// `<level>-only-no-digest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    All,
    Digest,
    Level { level: ThresholdLevel, only: bool, no_digest: bool },
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::All
    }
}

impl Threshold {
    /// Parse a threshold spec. An unrecognized spec degrades to `all` with a
    /// warning, consistent with not blocking changes we cannot classify.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim().to_lowercase();
        match spec.as_str() {
            "" | "all" => return Threshold::All,
            "digest" => return Threshold::Digest,
            _ => {}
        }

        let (base, no_digest) = match spec.strip_suffix("-no-digest") {
            Some(base) => (base, true),
            None => (spec.as_str(), false),
        };
        let (base, only) = match base.strip_suffix("-only") {
            Some(base) => (base, true),
            None => (base, false),
        };
        let level = match base {
            "major" => ThresholdLevel::Major,
            "minor" => ThresholdLevel::Minor,
            "patch" => ThresholdLevel::Patch,
            _ => {
                warn!(spec = %spec, "Unrecognized threshold spec, treating as 'all'");
                return Threshold::All;
            }
        };
        Threshold::Level { level, only, no_digest }
    }

    /// Whether a classified change passes this threshold.
    pub fn passes(&self, kind: &UpdateKind) -> bool {
        // Digest-kind changes pass everything except explicit -no-digest
        // specs; threshold 'digest' accepts only them.
        if kind.kind == ChangeKind::Digest {
            return match self {
                Threshold::All | Threshold::Digest => true,
                Threshold::Level { no_digest, .. } => !no_digest,
            };
        }

        // A change we could not grade severity for is never blocked.
        if kind.semver_diff == SemverDiff::Unknown {
            return true;
        }

        match self {
            Threshold::All => true,
            Threshold::Digest => false,
            Threshold::Level { level, only, .. } => {
                if *only {
                    kind.semver_diff.rank() == level.rank()
                } else {
                    kind.semver_diff.rank() <= level.rank()
                }
            }
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::All => write!(f, "all"),
            Threshold::Digest => write!(f, "digest"),
            Threshold::Level { level, only, no_digest } => {
                write!(f, "{}", level.as_str())?;
                if *only {
                    write!(f, "-only")?;
                }
                if *no_digest {
                    write!(f, "-no-digest")?;
                }
                Ok(())
            }
        }
    }
}

/// Trigger delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// One invocation per container.
    #[default]
    Simple,
    /// One invocation for the whole batch.
    Batch,
}

/// Per-trigger-instance configuration, supplied at startup or on
/// reconfiguration; never persisted as a domain entity.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub threshold: Threshold,
    /// Fire only on the cycle the update was first detected.
    pub once: bool,
    pub mode: TriggerMode,
    /// Restrict this trigger to containers reporting from a given agent.
    pub agent: Option<String>,
    /// Require an explicit agent tag on both trigger and container for the
    /// affinity to match.
    pub agent_match_strict: bool,
    /// Dismiss previously sent notifications once the update is applied.
    /// Acted on by notifier implementations consuming `update.applied`
    /// events, not by the gate itself.
    pub resolve_notifications: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::All,
            once: true,
            mode: TriggerMode::Simple,
            agent: None,
            agent_match_strict: false,
            resolve_notifications: true,
        }
    }
}

/// Whether a single filter reference matches a trigger id.
///
/// A reference is either a full `provider.name` or a bare `name`, matched
/// case-insensitively against the last two dot-separated segments of the
/// trigger id, so a bare name matches that trigger under any provider.
pub fn reference_matches_id(reference: &str, trigger_id: &str) -> bool {
    let reference = reference.trim().to_lowercase();
    if reference.is_empty() {
        return false;
    }

    let mut segments: Vec<&str> = trigger_id.split('.').collect();
    let name = segments.pop().unwrap_or("").to_lowercase();
    let provider = segments.pop().map(str::to_lowercase);

    if reference == name {
        return true;
    }
    match provider {
        Some(provider) => reference == format!("{provider}.{name}"),
        None => false,
    }
}

/// One entry of a comma-separated trigger filter string: `ref` or
/// `ref:threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFilter {
    pub reference: String,
    pub threshold: Option<Threshold>,
}

/// Parse a comma-separated filter string; entries are trimmed, empty
/// entries dropped.
pub fn parse_filters(raw: &str) -> Vec<TriggerFilter> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((reference, threshold)) => TriggerFilter {
                reference: reference.trim().to_string(),
                threshold: Some(Threshold::parse(threshold)),
            },
            None => TriggerFilter { reference: entry.to_string(), threshold: None },
        })
        .collect()
}

/// Decide whether a trigger should fire for a container's classified change.
///
/// Checks, in order: agent affinity, update availability, exclude filters
/// (veto on any match, thresholds ignored), include filters (must match, and
/// satisfy the entry's threshold when given), the trigger threshold, and
/// `once` semantics.
pub fn should_fire(container: &ContainerRecord, trigger_id: &str, config: &TriggerConfig) -> bool {
    if !agent_matches(container, config) {
        return false;
    }
    if !container.update_available {
        return false;
    }

    if let Some(raw) = container.trigger_exclude.as_deref() {
        if parse_filters(raw).iter().any(|f| reference_matches_id(&f.reference, trigger_id)) {
            return false;
        }
    }

    if let Some(raw) = container.trigger_include.as_deref() {
        let filters = parse_filters(raw);
        let matched = filters.iter().find(|f| reference_matches_id(&f.reference, trigger_id));
        match matched {
            Some(filter) => {
                if let Some(threshold) = filter.threshold {
                    if !threshold.passes(&container.update_kind) {
                        return false;
                    }
                }
            }
            None => return false,
        }
    }

    if !config.threshold.passes(&container.update_kind) {
        return false;
    }

    if config.once {
        container.changed
    } else {
        true
    }
}

/// Agent affinity check. A trigger bound to an agent only fires for
/// containers reporting that same agent; strict mode requires an explicit
/// agent tag on both sides.
fn agent_matches(container: &ContainerRecord, config: &TriggerConfig) -> bool {
    match (&config.agent, &container.agent) {
        (None, _) if !config.agent_match_strict => true,
        (None, _) => false,
        (Some(_), None) => false,
        (Some(trigger_agent), Some(container_agent)) => {
            trigger_agent.eq_ignore_ascii_case(container_agent)
        }
    }
}
