pub mod core;
pub mod http;
pub mod modules;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use crate::core::bypass::{BypassEvaluator, BypassOutcome, BypassTechnique};
pub use crate::core::context::{CancelHandle, ScanContext};
pub use crate::core::dispatcher::{BurstDispatcher, BurstPlan, BurstResult, Customizer};
pub use crate::core::error::{RunAllError, TesterError};
pub use crate::core::mutator::ProbeMutation;
pub use crate::core::oracle::{RateLimitOracle, RateLimitSignal, RateLimitVerdict};
pub use crate::core::registry::{TesterRef, TesterRegistry, VulnerabilityTester};
pub use crate::core::result::{Finding, ScanSummary, TestResult};
pub use crate::core::{Severity, VulnerabilityType};
pub use crate::http::{HttpClient, ProbeError, ProbeExecutor, ProbeRequest, ProbeResponse};
pub use crate::utils::payloads::PayloadCatalog;
pub use crate::utils::read_lines;

/// Target description shared by the CLI and every tester.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetConfig {
    pub base_url: String,
    /// Merged into every outgoing probe.
    pub headers: Vec<(String, String)>,
    pub method: String,
    pub body: Option<String>,
    pub timeout_secs: u64,
    pub proxy: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: Vec::new(),
            method: "GET".to_string(),
            body: None,
            timeout_secs: 10,
            proxy: None,
        }
    }
}

impl TargetConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Parses the base URL; only http(s) targets are accepted.
    pub fn validate(&self) -> Result<Url, TesterError> {
        let invalid = |reason: String| TesterError::InvalidTarget {
            target: self.base_url.clone(),
            reason,
        };

        let url = Url::parse(self.base_url.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }

    /// The request every tester starts from: base URL, configured method,
    /// body and headers.
    pub fn base_request(&self) -> Result<ProbeRequest, TesterError> {
        let url = self.validate()?;
        let method = reqwest::Method::from_bytes(self.method.trim().to_uppercase().as_bytes())
            .map_err(|_| TesterError::InvalidTarget {
                target: self.base_url.clone(),
                reason: format!("invalid method '{}'", self.method),
            })?;

        let mut request = ProbeRequest::new(method, url);
        for (name, value) in &self.headers {
            if !request.set_header(name, value) {
                return Err(TesterError::InvalidHeader(name.clone()));
            }
        }
        if let Some(body) = &self.body {
            request = request.with_body(body.as_str());
        }
        Ok(request)
    }
}

/// Policy constants for rate-limit calibration and bypass bursts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BurstPolicy {
    pub calibration_count: usize,
    pub calibration_concurrency: usize,
    pub bypass_count: usize,
    pub bypass_concurrency: usize,
    /// A technique bypasses the limiter only when its success ratio is
    /// strictly greater than this.
    pub success_threshold: f64,
    pub pacing_ms: Option<u64>,
}

impl Default for BurstPolicy {
    fn default() -> Self {
        Self {
            calibration_count: 30,
            calibration_concurrency: 10,
            bypass_count: 30,
            bypass_concurrency: 10,
            success_threshold: 0.8,
            pacing_ms: None,
        }
    }
}

impl BurstPolicy {
    pub fn pacing(&self) -> Option<Duration> {
        self.pacing_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    pub fn calibration_plan(&self) -> BurstPlan {
        BurstPlan::new(self.calibration_count, self.calibration_concurrency)
            .with_pacing(self.pacing())
    }

    pub fn bypass_plan(&self) -> BurstPlan {
        BurstPlan::new(self.bypass_count, self.bypass_concurrency).with_pacing(self.pacing())
    }
}

/// On-disk run configuration: target fields at the top level, burst policy
/// under `policy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    #[serde(flatten)]
    pub target: TargetConfig,
    pub policy: BurstPolicy,
}

impl ProbeConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Parses `Name: value` strings, skipping entries without a name.
pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter()
        .filter_map(|h| {
            let mut parts = h.splitn(2, ':');
            let key = parts.next()?.trim().to_string();
            let val = parts.next().unwrap_or("").trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some((key, val))
        })
        .collect()
}

/// Output abstraction for a probing run.
/// The CLI implements this with colored terminal output.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_result(&self, result: &TestResult);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new_ref(verbose: bool) -> SinkRef {
        Arc::new(Self { verbose })
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        println!("{}", colored);
    }

    fn on_result(&self, result: &TestResult) {
        use colored::*;
        let took = result
            .duration()
            .map(|d| format!("{}ms", d.num_milliseconds()))
            .unwrap_or_else(|| "-".to_string());

        if let Some(err) = &result.error {
            println!("{} {} failed: {}", "[!]".red().bold(), result.tester, err.red());
            return;
        }

        if result.findings().is_empty() {
            let status = if result.inconclusive {
                "inconclusive".yellow()
            } else {
                "clean".green()
            };
            println!("{} {} [{}] ({})", "[-]".dimmed(), result.tester, status, took.dimmed());
            return;
        }

        println!(
            "{} {} reported {} finding(s) ({})",
            "[+]".green().bold(),
            result.tester.bold(),
            result.findings().len(),
            took.dimmed()
        );
        for finding in result.findings() {
            let severity = match finding.severity {
                Severity::Critical | Severity::High => finding.severity.to_string().red().bold(),
                Severity::Medium => finding.severity.to_string().yellow(),
                _ => finding.severity.to_string().blue(),
            };
            println!("    {} {} [{}]", "*".bold(), finding.name.red().bold(), severity);
            println!("      Evidence: {}", finding.evidence.white());
            if !finding.cwe.is_empty() {
                println!("      CWE:      {} (score {:.1})", finding.cwe, finding.score);
            }
            if self.verbose {
                println!("      Fix:      {}", finding.remediation.dimmed());
                if let Some(curl) = finding.to_curl() {
                    println!("      curl:     {}", curl.dimmed());
                }
            }
        }
        println!("{}", "──────────────────────────────────────────".dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_custom_headers() {
        let raw = vec![
            "Authorization: Bearer abc:def".to_string(),
            ": orphan".to_string(),
            "X-Empty".to_string(),
        ];
        let parsed = parse_custom_headers(&raw);
        assert_eq!(
            parsed,
            vec![
                ("Authorization".to_string(), "Bearer abc:def".to_string()),
                ("X-Empty".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_unusable_targets() {
        assert!(TargetConfig::new("https://api.example.com/v1").validate().is_ok());
        assert!(matches!(
            TargetConfig::new("not a url").validate(),
            Err(TesterError::InvalidTarget { .. })
        ));
        assert!(TargetConfig::new("ftp://example.com").validate().is_err());
    }

    #[test]
    fn test_base_request_merges_headers() {
        let config = TargetConfig::new("https://api.example.com/users")
            .with_header("Authorization", "Bearer t");
        let req = config.base_request().unwrap();
        assert_eq!(req.method, reqwest::Method::GET);
        assert_eq!(req.header("authorization"), Some("Bearer t"));

        let bad = TargetConfig::new("https://api.example.com").with_header("bad header", "x");
        assert!(matches!(bad.base_request(), Err(TesterError::InvalidHeader(_))));
    }

    #[test]
    fn test_base_request_carries_method_and_body() {
        let mut config = TargetConfig::new("https://api.example.com/login");
        config.method = "post".to_string();
        config.body = Some(r#"{"user":"a"}"#.to_string());

        let req = config.base_request().unwrap();
        assert_eq!(req.method, reqwest::Method::POST);
        assert_eq!(req.body.as_deref(), Some(&br#"{"user":"a"}"#[..]));
    }

    #[test]
    fn test_load_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"baseUrl": "http://localhost:8080", "timeoutSecs": 3, "policy": {{"bypassCount": 50}}}}"#
        )
        .unwrap();

        let config = ProbeConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.target.base_url, "http://localhost:8080");
        assert_eq!(config.target.timeout_secs, 3);
        assert_eq!(config.target.method, "GET");
        assert!(config.target.headers.is_empty());
        assert_eq!(config.policy.bypass_count, 50);
        assert_eq!(config.policy.calibration_count, 30);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = BurstPolicy::default();
        assert_eq!(policy.calibration_plan(), BurstPlan::new(30, 10));
        assert_eq!(policy.success_threshold, 0.8);
        assert!(BurstPolicy { pacing_ms: Some(0), ..policy }.pacing().is_none());
    }
}
