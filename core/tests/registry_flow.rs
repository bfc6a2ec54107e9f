use apiprobe_core::{
    BurstPolicy, HttpClient, ProbeExecutor, ProbeRequest, ScanContext, ScanSummary, Severity,
    TargetConfig, TesterRegistry, VulnerabilityType,
};
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(headers: &[(String, String)]) -> Arc<dyn ProbeExecutor> {
    Arc::new(HttpClient::new(5, None, headers).unwrap())
}

#[tokio::test]
async fn test_http_client_applies_default_headers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer t"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&mock_server)
        .await;

    let executor = client(&[("Authorization".to_string(), "Bearer t".to_string())]);
    let url = Url::parse(&format!("{}/me", mock_server.uri())).unwrap();
    let response = executor.execute(&ProbeRequest::get(url)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "hello");

    let received = mock_server.received_requests().await.unwrap();
    assert!(received[0].headers.get("user-agent").is_some());
}

#[tokio::test]
async fn test_http_client_does_not_follow_redirects() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .mount(&mock_server)
        .await;

    let url = Url::parse(&mock_server.uri()).unwrap();
    let response = client(&[]).execute(&ProbeRequest::get(url)).await.unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_default_registry_against_clean_api() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-content-type-options", "nosniff")
                .set_body_raw("{\"items\":[]}", "application/json"),
        )
        .mount(&mock_server)
        .await;

    let registry = TesterRegistry::with_default_testers(client(&[]), BurstPolicy::default());
    let results = registry
        .run_all(&ScanContext::background(), &TargetConfig::new(format!("{}/items", mock_server.uri())))
        .await
        .unwrap();

    assert_eq!(results.len(), registry.len());
    let summary = ScanSummary::from_results(&results);
    assert_eq!(summary.findings, 0);
}

#[tokio::test]
async fn test_default_registry_reports_leaky_api() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("server", "Apache/2.4.41")
                .set_body_raw("{\"user\":\"admin\",\"password\":\"hunter2\"}", "application/json"),
        )
        .mount(&mock_server)
        .await;

    let mut registry = TesterRegistry::with_default_testers(client(&[]), BurstPolicy::default());
    registry.retain(|k| {
        matches!(k, VulnerabilityType::SecurityMisconfiguration | VulnerabilityType::ExcessiveDataExposure)
    });

    let results = registry
        .run_all(&ScanContext::background(), &TargetConfig::new(mock_server.uri()))
        .await
        .unwrap();

    let findings: Vec<_> = results.iter().flat_map(|r| r.findings()).collect();
    assert!(findings.iter().any(|f| f.name == "Missing Security Headers"));
    assert!(findings.iter().any(|f| f.name == "Version Disclosure [server]"));
    assert!(findings.iter().any(|f| f.severity == Severity::High && f.cwe == "CWE-200"));
}

#[tokio::test]
async fn test_invalid_target_aborts_run() {
    let registry = TesterRegistry::with_default_testers(client(&[]), BurstPolicy::default());
    let err = registry
        .run_all(&ScanContext::background(), &TargetConfig::new("ftp://example.com"))
        .await
        .unwrap_err();

    assert!(err.completed.is_empty());
    assert_eq!(err.tester, "broken-auth");
}
