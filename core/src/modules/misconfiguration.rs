use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::core::context::ScanContext;
use crate::core::error::TesterError;
use crate::core::registry::VulnerabilityTester;
use crate::core::result::{Finding, TestResult};
use crate::core::{Severity, VulnerabilityType};
use crate::http::{ProbeExecutor, ProbeRequest, ProbeResponse};
use crate::modules::send_probe;
use crate::utils::detector::ResponseDetector;
use crate::TargetConfig;

const NAME: &str = "misconfig";
const PROBE_ORIGIN: &str = "https://apiprobe-origin.invalid";
const BANNER_HEADERS: &[&str] = &["server", "x-powered-by", "x-aspnet-version"];

/// Header hygiene checks from a single probe carrying a foreign `Origin`.
pub struct MisconfigurationTester {
    executor: Arc<dyn ProbeExecutor>,
    detector: ResponseDetector,
}

impl MisconfigurationTester {
    pub fn new(executor: Arc<dyn ProbeExecutor>) -> Self {
        Self {
            executor,
            detector: ResponseDetector::new(),
        }
    }

    fn missing_security_headers(request: &ProbeRequest, response: &ProbeResponse) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !response.has_header("x-content-type-options") {
            missing.push("X-Content-Type-Options");
        }
        if request.url.scheme() == "https" && !response.has_header("strict-transport-security") {
            missing.push("Strict-Transport-Security");
        }
        missing
    }

    fn check_cors(request: &ProbeRequest, response: &ProbeResponse) -> Option<Finding> {
        let acao = response.header("access-control-allow-origin")?;
        let credentials = response
            .header("access-control-allow-credentials")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let (name, severity, score) = if acao == PROBE_ORIGIN {
            if credentials {
                ("CORS Origin Reflection with Credentials", Severity::High, 8.1)
            } else {
                ("CORS Origin Reflection", Severity::Medium, 5.3)
            }
        } else if acao.trim() == "*" && credentials {
            ("CORS Wildcard with Credentials", Severity::Medium, 5.3)
        } else {
            return None;
        };

        Some(
            Finding::builder(VulnerabilityType::SecurityMisconfiguration, name)
                .description("The API grants cross-origin access to an arbitrary origin.")
                .severity(severity)
                .request(request)
                .response(response)
                .evidence(format!(
                    "Origin: {} -> Access-Control-Allow-Origin: {}, Allow-Credentials: {}",
                    PROBE_ORIGIN, acao, credentials
                ))
                .remediation("Validate Origin against an explicit allow-list and never combine credentials with a reflected or wildcard origin.")
                .score(score)
                .cwe("CWE-942")
                .reference("https://portswigger.net/web-security/cors")
                .build(),
        )
    }
}

#[async_trait]
impl VulnerabilityTester for MisconfigurationTester {
    async fn test(&self, ctx: &ScanContext, target: &TargetConfig) -> Result<TestResult, TesterError> {
        let mut request = target.base_request()?;
        request.set_header("Origin", PROBE_ORIGIN);
        let mut result = TestResult::start(NAME);

        let Some(response) = send_probe(ctx, &self.executor, &request).await else {
            result.mark_inconclusive();
            return Ok(result.finish());
        };

        let missing = Self::missing_security_headers(&request, &response);
        if !missing.is_empty() {
            info!("[Misconfig] Missing security headers: {}", missing.join(", "));
            result.add_finding(
                Finding::builder(VulnerabilityType::SecurityMisconfiguration, "Missing Security Headers")
                    .description("Responses lack hardening headers browsers rely on.")
                    .severity(Severity::Low)
                    .request(&request)
                    .response(&response)
                    .evidence(format!("missing: {}", missing.join(", ")))
                    .remediation("Send X-Content-Type-Options: nosniff and, over TLS, Strict-Transport-Security.")
                    .score(3.1)
                    .cwe("CWE-693")
                    .reference("https://owasp.org/www-project-secure-headers/")
                    .build(),
            );
        }

        if let Some(finding) = Self::check_cors(&request, &response) {
            info!("[Misconfig] {}", finding.name);
            result.add_finding(finding);
        }

        for header in BANNER_HEADERS {
            let Some(value) = response.header(header) else {
                continue;
            };
            if self.detector.discloses_version(value) {
                result.add_finding(
                    Finding::builder(VulnerabilityType::SecurityMisconfiguration, format!("Version Disclosure [{}]", header))
                        .description("A response header reveals the exact software version in use.")
                        .severity(Severity::Low)
                        .request(&request)
                        .response(&response)
                        .evidence(format!("{}: {}", header, value))
                        .remediation("Strip or genericise version banners at the server or gateway.")
                        .score(2.7)
                        .cwe("CWE-200")
                        .build(),
                );
            }
        }

        Ok(result.finish())
    }

    fn vuln_type(&self) -> VulnerabilityType {
        VulnerabilityType::SecurityMisconfiguration
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Checks security headers, CORS policy and version banners"
    }
}
