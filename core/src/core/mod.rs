pub mod bypass;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod mutator;
pub mod oracle;
pub mod registry;
pub mod result;

use serde::{Deserialize, Serialize};

/// Vulnerability category a tester is responsible for. One tester per category
/// can be registered at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityType {
    BrokenObjectLevelAuthorization,
    BrokenAuthentication,
    ExcessiveDataExposure,
    LackOfRateLimiting,
    BrokenFunctionLevelAuthorization,
    MassAssignment,
    SecurityMisconfiguration,
    Injection,
    ImproperAssetManagement,
}

impl VulnerabilityType {
    pub const ALL: [VulnerabilityType; 9] = [
        VulnerabilityType::BrokenObjectLevelAuthorization,
        VulnerabilityType::BrokenAuthentication,
        VulnerabilityType::ExcessiveDataExposure,
        VulnerabilityType::LackOfRateLimiting,
        VulnerabilityType::BrokenFunctionLevelAuthorization,
        VulnerabilityType::MassAssignment,
        VulnerabilityType::SecurityMisconfiguration,
        VulnerabilityType::Injection,
        VulnerabilityType::ImproperAssetManagement,
    ];

    /// Short machine-friendly tag, also accepted by [`VulnerabilityType::from_tag`].
    pub fn tag(&self) -> &'static str {
        match self {
            VulnerabilityType::BrokenObjectLevelAuthorization => "bola",
            VulnerabilityType::BrokenAuthentication => "broken-auth",
            VulnerabilityType::ExcessiveDataExposure => "data-exposure",
            VulnerabilityType::LackOfRateLimiting => "rate-limit",
            VulnerabilityType::BrokenFunctionLevelAuthorization => "bfla",
            VulnerabilityType::MassAssignment => "mass-assignment",
            VulnerabilityType::SecurityMisconfiguration => "misconfig",
            VulnerabilityType::Injection => "injection",
            VulnerabilityType::ImproperAssetManagement => "assets",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        Self::ALL.into_iter().find(|v| v.tag() == tag)
    }
}

impl std::fmt::Display for VulnerabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VulnerabilityType::BrokenObjectLevelAuthorization => write!(f, "Broken Object Level Authorization"),
            VulnerabilityType::BrokenAuthentication => write!(f, "Broken Authentication"),
            VulnerabilityType::ExcessiveDataExposure => write!(f, "Excessive Data Exposure"),
            VulnerabilityType::LackOfRateLimiting => write!(f, "Lack of Rate Limiting"),
            VulnerabilityType::BrokenFunctionLevelAuthorization => write!(f, "Broken Function Level Authorization"),
            VulnerabilityType::MassAssignment => write!(f, "Mass Assignment"),
            VulnerabilityType::SecurityMisconfiguration => write!(f, "Security Misconfiguration"),
            VulnerabilityType::Injection => write!(f, "Injection"),
            VulnerabilityType::ImproperAssetManagement => write!(f, "Improper Asset Management"),
        }
    }
}

/// Ordinal severity, `Info` lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Info => "Info",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        };
        write!(f, "{}", label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip_for_every_category() {
        for v in VulnerabilityType::ALL {
            assert_eq!(VulnerabilityType::from_tag(v.tag()), Some(v));
        }
        assert_eq!(VulnerabilityType::from_tag(" Rate-Limit "), Some(VulnerabilityType::LackOfRateLimiting));
        assert_eq!(VulnerabilityType::from_tag("nope"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
    }
}
