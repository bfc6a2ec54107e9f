use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::core::context::ScanContext;
use crate::core::error::TesterError;
use crate::core::mutator::{self, ProbeMutation};
use crate::core::registry::VulnerabilityTester;
use crate::core::result::{Finding, TestResult};
use crate::core::{Severity, VulnerabilityType};
use crate::http::{ProbeExecutor, ProbeRequest};
use crate::modules::send_probe;
use crate::utils::detector::ResponseDetector;
use crate::utils::payloads::{PayloadCatalog, FALLBACK_PARAM};
use crate::TargetConfig;

const NAME: &str = "injection";

/// Injects SQLi and XSS payloads into each query parameter of the target.
///
/// At most one finding per parameter and payload family.
pub struct InjectionTester {
    executor: Arc<dyn ProbeExecutor>,
    detector: ResponseDetector,
    payloads: PayloadCatalog,
}

impl InjectionTester {
    pub fn new(executor: Arc<dyn ProbeExecutor>, payloads: PayloadCatalog) -> Self {
        Self {
            executor,
            detector: ResponseDetector::new(),
            payloads,
        }
    }

    fn inject(base: &ProbeRequest, param: &str, present: bool, payload: &str) -> ProbeRequest {
        if present {
            mutator::replace_query_param(base, param, payload)
        } else {
            base.mutated(&ProbeMutation::new().query(param, payload))
        }
    }
}

#[async_trait]
impl VulnerabilityTester for InjectionTester {
    async fn test(&self, ctx: &ScanContext, target: &TargetConfig) -> Result<TestResult, TesterError> {
        let base = target.base_request()?;
        let mut result = TestResult::start(NAME);

        // Error text already present without any payload is not evidence.
        let baseline_sql_error = match send_probe(ctx, &self.executor, &base).await {
            Some(resp) => self.detector.find_sql_error(&resp.body_text()).is_some(),
            None => {
                result.mark_inconclusive();
                return Ok(result.finish());
            }
        };

        let existing = mutator::query_param_names(&base);
        let params: Vec<(String, bool)> = if existing.is_empty() {
            vec![(FALLBACK_PARAM.to_string(), false)]
        } else {
            existing.into_iter().map(|p| (p, true)).collect()
        };

        for (param, present) in &params {
            info!("[Injection] Testing parameter '{}'", param);

            if !baseline_sql_error {
                for payload in &self.payloads.sqli_payloads {
                    let request = Self::inject(&base, param, *present, payload);
                    let Some(resp) = send_probe(ctx, &self.executor, &request).await else {
                        continue;
                    };
                    if let Some(dbms) = self.detector.find_sql_error(&resp.body_text()) {
                        result.add_finding(
                            Finding::builder(VulnerabilityType::Injection, format!("SQL Injection [param: {}]", param))
                                .description("User input reaches a SQL query without parameterisation; the database error leaks into the response.")
                                .severity(Severity::High)
                                .request(&request)
                                .response(&resp)
                                .evidence(format!("{} error signature after payload {}", dbms, payload))
                                .remediation("Use parameterised queries or a query builder; never concatenate request input into SQL.")
                                .score(8.6)
                                .cwe("CWE-89")
                                .reference("https://owasp.org/www-community/attacks/SQL_Injection")
                                .build(),
                        );
                        break;
                    }
                }
            }

            for payload in &self.payloads.xss_payloads {
                let request = Self::inject(&base, param, *present, payload);
                let Some(resp) = send_probe(ctx, &self.executor, &request).await else {
                    continue;
                };
                if self
                    .detector
                    .is_xss_reflected(&resp.body_text(), payload, resp.content_type.as_deref())
                {
                    result.add_finding(
                        Finding::builder(VulnerabilityType::Injection, format!("Reflected XSS [param: {}]", param))
                            .description("The parameter is echoed into an HTML response without encoding.")
                            .severity(Severity::Medium)
                            .request(&request)
                            .response(&resp)
                            .evidence(format!("payload {} reflected unescaped in text/html body", payload))
                            .remediation("HTML-encode output by context and set a restrictive Content-Security-Policy.")
                            .score(6.1)
                            .cwe("CWE-79")
                            .reference("https://owasp.org/www-community/attacks/xss/")
                            .build(),
                    );
                    break;
                }
            }

            if ctx.is_cancelled() {
                result.mark_inconclusive();
                break;
            }
        }

        Ok(result.finish())
    }

    fn vuln_type(&self) -> VulnerabilityType {
        VulnerabilityType::Injection
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Injects SQL and script payloads into query parameters and looks for error signatures or reflection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ProbeError, ProbeResponse};
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

    /// Reflects `id` into HTML and raises a MySQL error on quotes in `name`.
    struct VulnerableApp;

    #[async_trait]
    impl ProbeExecutor for VulnerableApp {
        async fn execute(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
            let mut body = String::new();
            for (k, v) in request.url.query_pairs() {
                if k == "id" {
                    body.push_str(&format!("<p>{}</p>", v));
                }
                if k == "name" && v.contains('\'') {
                    body.push_str("You have an error in your SQL syntax");
                }
            }
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
            Ok(ProbeResponse::new(200, headers, body.into_bytes()))
        }
    }

    #[tokio::test]
    async fn test_finds_sqli_and_xss_per_parameter() {
        let tester = InjectionTester::new(Arc::new(VulnerableApp), PayloadCatalog::builtin());
        let target = TargetConfig::new("http://127.0.0.1:9/search?id=1&name=bob");

        let result = tester.test(&ScanContext::background(), &target).await.unwrap();
        let mut names: Vec<String> = result.findings().iter().map(|f| f.name.clone()).collect();
        names.sort();

        assert_eq!(
            names,
            vec![
                "Reflected XSS [param: id]".to_string(),
                "SQL Injection [param: name]".to_string(),
            ]
        );
        let sqli = result.findings().iter().find(|f| f.cwe == "CWE-89").unwrap();
        assert!(sqli.evidence.starts_with("MySQL"));
        assert!(sqli.response.is_some());
    }

    #[tokio::test]
    async fn test_fallback_parameter_when_url_has_none() {
        struct Echo;

        #[async_trait]
        impl ProbeExecutor for Echo {
            async fn execute(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
                let body = request.url.query_pairs().map(|(_, v)| v.into_owned()).collect::<String>();
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
                Ok(ProbeResponse::new(200, headers, body.into_bytes()))
            }
        }

        let tester = InjectionTester::new(Arc::new(Echo), PayloadCatalog::builtin());
        let result = tester
            .test(&ScanContext::background(), &TargetConfig::new("http://127.0.0.1:9/search"))
            .await
            .unwrap();

        assert_eq!(result.findings().len(), 1);
        assert_eq!(result.findings()[0].name, format!("Reflected XSS [param: {}]", FALLBACK_PARAM));
    }
}
