use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

use crate::core::context::ScanContext;
use crate::core::error::TesterError;
use crate::core::mutator::ProbeMutation;
use crate::core::registry::VulnerabilityTester;
use crate::core::result::{Finding, TestResult};
use crate::core::{Severity, VulnerabilityType};
use crate::http::{ProbeExecutor, ProbeRequest, ProbeResponse};
use crate::modules::send_probe;
use crate::TargetConfig;

const NAME: &str = "broken-auth";
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key", "api-key"];
const INVALID_BEARER: &str = "Bearer apiprobe.invalid.token";

/// Replays the configured request without credentials, then with a forged
/// bearer token, and reports when either still gets the protected response.
///
/// Needs at least one credential header on the target; without one there is
/// nothing to strip and the tester reports nothing.
pub struct AuthenticationTester {
    executor: Arc<dyn ProbeExecutor>,
}

impl AuthenticationTester {
    pub fn new(executor: Arc<dyn ProbeExecutor>) -> Self {
        Self { executor }
    }

    fn credential_headers(request: &ProbeRequest) -> Vec<&'static str> {
        CREDENTIAL_HEADERS
            .iter()
            .copied()
            .filter(|h| request.header(h).is_some())
            .collect()
    }

    /// Same status class and a body within 10% of the baseline length.
    fn looks_like(baseline: &ProbeResponse, candidate: &ProbeResponse) -> bool {
        if !candidate.is_success() {
            return false;
        }
        if candidate.body == baseline.body {
            return true;
        }
        let base_len = baseline.body.len() as f64;
        let len = candidate.body.len() as f64;
        base_len > 0.0 && ((len - base_len).abs() / base_len) <= 0.10
    }

    fn finding(
        name: &str,
        description: &str,
        request: &ProbeRequest,
        response: &ProbeResponse,
        evidence: String,
    ) -> Finding {
        Finding::builder(VulnerabilityType::BrokenAuthentication, name)
            .description(description)
            .severity(Severity::High)
            .request(request)
            .response(response)
            .evidence(evidence)
            .remediation("Enforce authentication on every route in middleware and reject unsigned or unknown tokens.")
            .score(8.2)
            .cwe("CWE-287")
            .reference("https://owasp.org/API-Security/editions/2023/en/0xa2-broken-authentication/")
            .build()
    }
}

#[async_trait]
impl VulnerabilityTester for AuthenticationTester {
    async fn test(&self, ctx: &ScanContext, target: &TargetConfig) -> Result<TestResult, TesterError> {
        let base = target.base_request()?;
        let mut result = TestResult::start(NAME);

        let credentials = Self::credential_headers(&base);
        if credentials.is_empty() {
            debug!("[Auth] No credential headers configured, nothing to strip");
            return Ok(result.finish());
        }

        let Some(baseline) = send_probe(ctx, &self.executor, &base).await else {
            result.mark_inconclusive();
            return Ok(result.finish());
        };
        if !baseline.is_success() {
            info!("[Auth] Baseline answered HTTP {}, skipping", baseline.status);
            return Ok(result.finish());
        }

        let stripped = credentials
            .iter()
            .fold(ProbeMutation::new(), |m, h| m.without_header(*h));
        let anonymous = base.mutated(&stripped);
        if let Some(response) = send_probe(ctx, &self.executor, &anonymous).await {
            if Self::looks_like(&baseline, &response) {
                result.add_finding(Self::finding(
                    "Authentication Not Enforced",
                    "The endpoint returns the same data with all credentials removed.",
                    &anonymous,
                    &response,
                    format!(
                        "removed {} -> HTTP {} ({} bytes, baseline {} bytes)",
                        credentials.join(", "),
                        response.status,
                        response.body.len(),
                        baseline.body.len()
                    ),
                ));
            }
        }

        if credentials.contains(&"authorization") {
            let forged = base.mutated(&ProbeMutation::new().header("Authorization", INVALID_BEARER));
            if let Some(response) = send_probe(ctx, &self.executor, &forged).await {
                if Self::looks_like(&baseline, &response) {
                    result.add_finding(Self::finding(
                        "Invalid Token Accepted",
                        "The endpoint accepts a bearer token it could not have issued.",
                        &forged,
                        &response,
                        format!("Authorization: {} -> HTTP {}", INVALID_BEARER, response.status),
                    ));
                }
            }
        }

        Ok(result.finish())
    }

    fn vuln_type(&self) -> VulnerabilityType {
        VulnerabilityType::BrokenAuthentication
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Replays the request without credentials and with a forged token"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ProbeError;
    use reqwest::header::HeaderMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "Bearer real-token";

    /// `strict` apps check the exact token; lax ones only look for the header.
    struct App {
        strict: bool,
        calls: AtomicUsize,
    }

    impl App {
        fn new(strict: bool) -> Self {
            Self { strict, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ProbeExecutor for App {
        async fn execute(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let allowed = match request.header("authorization") {
                Some(token) => !self.strict || token == SECRET,
                None => false,
            };
            let (status, body) = if allowed {
                (200, r#"{"orders":[1,2,3]}"#)
            } else {
                (401, r#"{"error":"unauthorized"}"#)
            };
            Ok(ProbeResponse::new(status, HeaderMap::new(), body.as_bytes().to_vec()))
        }
    }

    fn target() -> TargetConfig {
        TargetConfig::new("http://127.0.0.1:9/orders").with_header("Authorization", SECRET)
    }

    #[tokio::test]
    async fn test_strict_app_is_clean() {
        let tester = AuthenticationTester::new(Arc::new(App::new(true)));
        let result = tester.test(&ScanContext::background(), &target()).await.unwrap();
        assert!(result.findings().is_empty());
    }

    #[tokio::test]
    async fn test_forged_token_accepted() {
        let tester = AuthenticationTester::new(Arc::new(App::new(false)));
        let result = tester.test(&ScanContext::background(), &target()).await.unwrap();

        assert_eq!(result.findings().len(), 1);
        let finding = &result.findings()[0];
        assert_eq!(finding.name, "Invalid Token Accepted");
        assert_eq!(finding.cwe, "CWE-287");
        assert!(finding.to_curl().unwrap().contains(INVALID_BEARER));
    }

    #[tokio::test]
    async fn test_no_credentials_sends_nothing() {
        let app = Arc::new(App::new(false));
        let tester = AuthenticationTester::new(app.clone());
        let result = tester
            .test(&ScanContext::background(), &TargetConfig::new("http://127.0.0.1:9/orders"))
            .await
            .unwrap();

        assert!(result.findings().is_empty());
        assert_eq!(app.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_body_similarity() {
        let ok = |body: &str| ProbeResponse::new(200, HeaderMap::new(), body.as_bytes().to_vec());
        let baseline = ok("0123456789");

        assert!(AuthenticationTester::looks_like(&baseline, &ok("0123456789")));
        assert!(AuthenticationTester::looks_like(&baseline, &ok("012345678")));
        assert!(!AuthenticationTester::looks_like(&baseline, &ok("01234")));
        assert!(!AuthenticationTester::looks_like(
            &baseline,
            &ProbeResponse::new(401, HeaderMap::new(), b"0123456789".to_vec())
        ));
    }
}
