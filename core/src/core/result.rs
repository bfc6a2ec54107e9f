use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{Severity, VulnerabilityType};
use crate::http::{ProbeRequest, ProbeResponse, RequestSnapshot, ResponseSnapshot};

/// One confirmed condition reported by a tester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub vuln_type: VulnerabilityType,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub evidence: String,
    pub remediation: String,
    pub score: f32,
    pub cwe: String,
    pub references: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl Finding {
    pub fn builder(vuln_type: VulnerabilityType, name: impl Into<String>) -> FindingBuilder {
        FindingBuilder::new(vuln_type, name)
    }

    /// Builds a curl command that reproduces this finding, when the triggering
    /// request was kept.
    pub fn to_curl(&self) -> Option<String> {
        let req = self.request.as_ref()?;
        let mut parts = vec![format!("curl -X {} '{}'", req.method, req.url)];
        for (k, v) in &req.headers {
            parts.push(format!("-H '{}: {}'", k, v));
        }
        if let Some(ref body) = req.body {
            if !body.is_empty() {
                parts.push(format!("-d '{}'", body));
            }
        }
        parts.push("--insecure".to_string());
        Some(parts.join(" "))
    }
}

pub struct FindingBuilder {
    finding: Finding,
}

impl FindingBuilder {
    fn new(vuln_type: VulnerabilityType, name: impl Into<String>) -> Self {
        Self {
            finding: Finding {
                vuln_type,
                name: name.into(),
                description: String::new(),
                severity: Severity::Info,
                request: None,
                response: None,
                evidence: String::new(),
                remediation: String::new(),
                score: 0.0,
                cwe: String::new(),
                references: Vec::new(),
                detected_at: Utc::now(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.finding.description = description.into();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.finding.severity = severity;
        self
    }

    pub fn request(mut self, request: &ProbeRequest) -> Self {
        self.finding.request = Some(RequestSnapshot::from(request));
        self
    }

    pub fn response(mut self, response: &ProbeResponse) -> Self {
        self.finding.response = Some(ResponseSnapshot::from(response));
        self
    }

    pub fn evidence(mut self, evidence: impl Into<String>) -> Self {
        self.finding.evidence = evidence.into();
        self
    }

    pub fn remediation(mut self, remediation: impl Into<String>) -> Self {
        self.finding.remediation = remediation.into();
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.finding.score = score.clamp(0.0, 10.0);
        self
    }

    pub fn cwe(mut self, cwe: impl Into<String>) -> Self {
        self.finding.cwe = cwe.into();
        self
    }

    pub fn reference(mut self, url: impl Into<String>) -> Self {
        self.finding.references.push(url.into());
        self
    }

    pub fn build(self) -> Finding {
        self.finding
    }
}

/// Outcome of one tester invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub tester: String,
    findings: Vec<Finding>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// A burst was cut short or came back empty, so "no findings" proves nothing.
    pub inconclusive: bool,
}

impl TestResult {
    pub fn start(tester: impl Into<String>) -> Self {
        Self {
            tester: tester.into(),
            findings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            inconclusive: false,
        }
    }

    /// Result standing in for a tester that aborted before producing one.
    pub fn failed(tester: impl Into<String>, error: impl std::fmt::Display) -> Self {
        let mut result = Self::start(tester);
        result.error = Some(error.to_string());
        result.finish()
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn mark_inconclusive(&mut self) {
        self.inconclusive = true;
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// Finding counts per severity across a set of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub testers: usize,
    pub findings: usize,
    pub inconclusive: usize,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl ScanSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = ScanSummary {
            testers: results.len(),
            ..Default::default()
        };
        for result in results {
            if result.inconclusive {
                summary.inconclusive += 1;
            }
            for finding in result.findings() {
                summary.findings += 1;
                *summary.by_severity.entry(finding.severity).or_insert(0) += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn sample_finding(severity: Severity) -> Finding {
        let req = ProbeRequest::get(Url::parse("https://api.example.com/login").unwrap())
            .with_header("X-Forwarded-For", "10.0.0.1");
        Finding::builder(VulnerabilityType::LackOfRateLimiting, "IP Rotation Bypass")
            .severity(severity)
            .request(&req)
            .evidence("30/30 probes succeeded")
            .score(12.0)
            .cwe("CWE-770")
            .reference("https://owasp.org/API-Security/")
            .build()
    }

    #[test]
    fn test_builder_clamps_score() {
        let finding = sample_finding(Severity::High);
        assert_eq!(finding.score, 10.0);
        assert_eq!(finding.references.len(), 1);
    }

    #[test]
    fn test_to_curl() {
        let curl = sample_finding(Severity::High).to_curl().unwrap();
        assert!(curl.starts_with("curl -X GET 'https://api.example.com/login'"));
        assert!(curl.contains("-H 'x-forwarded-for: 10.0.0.1'"));

        let bare = Finding::builder(VulnerabilityType::Injection, "x").build();
        assert!(bare.to_curl().is_none());
    }

    #[test]
    fn test_result_lifecycle() {
        let mut result = TestResult::start("rate-limit");
        assert!(result.duration().is_none());
        result.add_finding(sample_finding(Severity::Medium));
        result.add_finding(sample_finding(Severity::High));
        let result = result.finish();

        assert_eq!(result.findings().len(), 2);
        assert_eq!(result.highest_severity(), Some(Severity::High));
        assert!(result.duration().unwrap() >= chrono::Duration::zero());
    }

    #[test]
    fn test_failed_result_carries_error() {
        let result = TestResult::failed("injection", "invalid target");
        assert_eq!(result.error.as_deref(), Some("invalid target"));
        assert!(result.findings().is_empty());
        assert!(result.finished_at.is_some());
    }

    #[test]
    fn test_summary_counts() {
        let mut a = TestResult::start("a");
        a.add_finding(sample_finding(Severity::High));
        a.add_finding(sample_finding(Severity::High));
        let mut b = TestResult::start("b");
        b.mark_inconclusive();

        let summary = ScanSummary::from_results(&[a, b]);
        assert_eq!(summary.testers, 2);
        assert_eq!(summary.findings, 2);
        assert_eq!(summary.inconclusive, 1);
        assert_eq!(summary.by_severity.get(&Severity::High), Some(&2));
    }
}
