//! Security gating types and scanner seam.
//!
//! Signature verification, vulnerability scanning and SBOM generation are
//! delegated to external tooling behind the [`SecurityScanner`] trait; this
//! module owns the verdict logic and the report persisted against the
//! container record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Vulnerability severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum VulnerabilitySeverity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl VulnerabilitySeverity {
    /// Parse severity from string.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CRITICAL" => VulnerabilitySeverity::Critical,
            "HIGH" => VulnerabilitySeverity::High,
            "MEDIUM" => VulnerabilitySeverity::Medium,
            "LOW" => VulnerabilitySeverity::Low,
            _ => VulnerabilitySeverity::Unknown,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VulnerabilitySeverity::Critical => "CRITICAL",
            VulnerabilitySeverity::High => "HIGH",
            VulnerabilitySeverity::Medium => "MEDIUM",
            VulnerabilitySeverity::Low => "LOW",
            VulnerabilitySeverity::Unknown => "UNKNOWN",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            VulnerabilitySeverity::Critical => 4,
            VulnerabilitySeverity::High => 3,
            VulnerabilitySeverity::Medium => 2,
            VulnerabilitySeverity::Low => 1,
            VulnerabilitySeverity::Unknown => 0,
        }
    }
}

impl fmt::Display for VulnerabilitySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signature verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    Verified,
    Unverified,
    Skipped,
}

/// One vulnerability found in an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFinding {
    /// CVE ID (e.g. "CVE-2024-12345").
    pub id: String,
    pub severity: VulnerabilitySeverity,
    pub package_name: String,
    pub installed_version: String,
    pub fixed_version: String,
    pub title: String,
}

/// Scan verdict against the configured policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanVerdict {
    Passed,
    Blocked,
}

/// Security gate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Verify image signature before scanning; unverified images hard-fail.
    pub verify_signatures: bool,
    /// Generate an SBOM alongside the scan.
    pub generate_sbom: bool,
    /// Highest severity tolerated; findings strictly above it block the
    /// update.
    pub max_allowed_severity: VulnerabilitySeverity,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            verify_signatures: false,
            generate_sbom: false,
            max_allowed_severity: VulnerabilitySeverity::High,
        }
    }
}

impl SecurityPolicy {
    /// Verdict for a set of findings under this policy.
    pub fn verdict(&self, findings: &[ScanFinding]) -> ScanVerdict {
        let blocked = findings
            .iter()
            .any(|f| f.severity.rank() > self.max_allowed_severity.rank());
        if blocked {
            ScanVerdict::Blocked
        } else {
            ScanVerdict::Passed
        }
    }
}

/// Report persisted against the container record after a gate run,
/// regardless of the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub image: String,
    pub scanned_at: DateTime<Utc>,
    pub signature: Option<SignatureStatus>,
    pub verdict: Option<ScanVerdict>,
    pub findings: Vec<ScanFinding>,
    pub sbom_generated: bool,
}

/// Scanner seam: signature verification, vulnerability scanning, SBOM.
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn verify_signature(&self, image_ref: &str) -> Result<SignatureStatus>;

    async fn scan_image(&self, image_ref: &str) -> Result<Vec<ScanFinding>>;

    async fn generate_sbom(&self, image_ref: &str) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: VulnerabilitySeverity) -> ScanFinding {
        ScanFinding { severity, ..Default::default() }
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(VulnerabilitySeverity::parse("critical"), VulnerabilitySeverity::Critical);
        assert_eq!(VulnerabilitySeverity::parse("HIGH"), VulnerabilitySeverity::High);
        assert_eq!(VulnerabilitySeverity::parse("bogus"), VulnerabilitySeverity::Unknown);
    }

    #[test]
    fn test_verdict_blocks_above_threshold() {
        let policy = SecurityPolicy {
            max_allowed_severity: VulnerabilitySeverity::Medium,
            ..Default::default()
        };
        assert_eq!(
            policy.verdict(&[finding(VulnerabilitySeverity::Low)]),
            ScanVerdict::Passed
        );
        assert_eq!(
            policy.verdict(&[finding(VulnerabilitySeverity::Medium)]),
            ScanVerdict::Passed
        );
        assert_eq!(
            policy.verdict(&[
                finding(VulnerabilitySeverity::Low),
                finding(VulnerabilitySeverity::High)
            ]),
            ScanVerdict::Blocked
        );
    }

    #[test]
    fn test_no_findings_pass() {
        assert_eq!(SecurityPolicy::default().verdict(&[]), ScanVerdict::Passed);
    }
}
