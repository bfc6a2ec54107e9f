use async_trait::async_trait;
use log::info;
use rand::Rng;
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

const NAME: &str = "data-exposure";

/// Looks for secrets in the normal response and for stack traces in the
/// response to a path that should not exist.
pub struct DataExposureTester {
    executor: Arc<dyn ProbeExecutor>,
    detector: ResponseDetector,
}

impl DataExposureTester {
    pub fn new(executor: Arc<dyn ProbeExecutor>) -> Self {
        Self {
            executor,
            detector: ResponseDetector::new(),
        }
    }

    /// Same request aimed at a random sibling path, to provoke an error page.
    fn missing_path_request(base: &ProbeRequest) -> ProbeRequest {
        let mut request = base.clone();
        let marker = format!("apiprobe-{:08x}", rand::rng().random::<u32>());
        let path = format!("{}/{}", base.url.path().trim_end_matches('/'), marker);
        request.url.set_path(&path);
        request
    }

    fn inspect(&self, request: &ProbeRequest, response: &ProbeResponse, result: &mut TestResult) {
        let body = response.body_text();

        if let Some(label) = self.detector.find_secret(&body) {
            info!("[DataExposure] {} in response from {}", label, request.url);
            result.add_finding(
                Finding::builder(VulnerabilityType::ExcessiveDataExposure, format!("Sensitive Data Exposure: {}", label))
                    .description("The response body carries credentials or key material.")
                    .severity(Severity::High)
                    .request(request)
                    .response(response)
                    .evidence(format!("{} pattern matched in response body", label))
                    .remediation("Filter responses through explicit output schemas and keep secrets out of API payloads.")
                    .score(7.5)
                    .cwe("CWE-200")
                    .reference("https://owasp.org/API-Security/editions/2019/en/0xa3-excessive-data-exposure/")
                    .build(),
            );
        }

        if let Some(label) = self.detector.find_stack_trace(&body) {
            info!("[DataExposure] {} in response from {}", label, request.url);
            result.add_finding(
                Finding::builder(VulnerabilityType::ExcessiveDataExposure, format!("Stack Trace Disclosure: {}", label))
                    .description("Error responses expose internal stack traces.")
                    .severity(Severity::Medium)
                    .request(request)
                    .response(response)
                    .evidence(format!("{} in HTTP {} body", label, response.status))
                    .remediation("Return generic error bodies in production and log details server-side.")
                    .score(5.3)
                    .cwe("CWE-209")
                    .build(),
            );
        }
    }
}

#[async_trait]
impl VulnerabilityTester for DataExposureTester {
    async fn test(&self, ctx: &ScanContext, target: &TargetConfig) -> Result<TestResult, TesterError> {
        let base = target.base_request()?;
        let mut result = TestResult::start(NAME);
        let mut answered = 0;

        for request in [base.clone(), Self::missing_path_request(&base)] {
            if let Some(response) = send_probe(ctx, &self.executor, &request).await {
                answered += 1;
                self.inspect(&request, &response, &mut result);
            }
        }

        if answered == 0 {
            result.mark_inconclusive();
        }
        Ok(result.finish())
    }

    fn vuln_type(&self) -> VulnerabilityType {
        VulnerabilityType::ExcessiveDataExposure
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Scans responses and error pages for secrets and stack traces"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ProbeError;
    use reqwest::header::HeaderMap;

    /// Leaks a password on `/users`, a Python traceback on anything else.
    struct LeakyApp;

    #[async_trait]
    impl ProbeExecutor for LeakyApp {
        async fn execute(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
            if request.url.path() == "/users" {
                let body = r#"[{"id":1,"user":"admin","password":"s3cr3t"}]"#;
                return Ok(ProbeResponse::new(200, HeaderMap::new(), body.as_bytes().to_vec()));
            }
            let body = "Traceback (most recent call last):\n  File \"/srv/app.py\", line 12";
            Ok(ProbeResponse::new(500, HeaderMap::new(), body.as_bytes().to_vec()))
        }
    }

    #[tokio::test]
    async fn test_secret_and_stack_trace_reported() {
        let tester = DataExposureTester::new(Arc::new(LeakyApp));
        let result = tester
            .test(&ScanContext::background(), &TargetConfig::new("http://127.0.0.1:9/users"))
            .await
            .unwrap();

        let names: Vec<&str> = result.findings().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Sensitive Data Exposure: Password field", "Stack Trace Disclosure: Python traceback"]
        );
        assert_eq!(result.findings()[1].cwe, "CWE-209");
        assert!(result.findings()[1].request.as_ref().unwrap().url.contains("/users/apiprobe-"));
    }

    #[test]
    fn test_missing_path_is_sibling() {
        let base = TargetConfig::new("http://127.0.0.1:9/api/v1/").base_request().unwrap();
        let probe = DataExposureTester::missing_path_request(&base);
        assert!(probe.url.path().starts_with("/api/v1/apiprobe-"));
        assert_eq!(probe.url.path().matches("//").count(), 0);
    }
}
