use apiprobe_core::{
    BurstDispatcher, BurstPolicy, BypassEvaluator, BypassTechnique, HttpClient, ProbeExecutor,
    RateLimitOracle, ScanContext, TargetConfig, VulnerabilityTester,
};
use apiprobe_core::modules::RateLimitTester;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers 429 to every fifth request it sees, whatever the headers say.
struct EveryFifthLimited {
    seen: AtomicUsize,
}

impl Respond for EveryFifthLimited {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n % 5 == 4 {
            ResponseTemplate::new(429).insert_header("retry-after", "1")
        } else {
            ResponseTemplate::new(200).set_body_string("{\"ok\":true}")
        }
    }
}

fn executor() -> Arc<dyn ProbeExecutor> {
    Arc::new(HttpClient::new(5, None, &[]).unwrap())
}

#[tokio::test]
async fn test_unlimited_target_skips_bypass_phase() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .mount(&mock_server)
        .await;

    let policy = BurstPolicy::default();
    let tester = RateLimitTester::new(executor(), policy.clone());
    let target = TargetConfig::new(format!("{}/api/login", mock_server.uri()));

    let result = tester.test(&ScanContext::background(), &target).await.unwrap();
    assert!(result.findings().is_empty());
    assert!(!result.inconclusive);

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), policy.calibration_count);

    let ids: HashSet<String> = received
        .iter()
        .filter_map(|r| r.headers.get("x-probe-id"))
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    assert_eq!(ids.len(), policy.calibration_count);
}

#[tokio::test]
async fn test_burst_keeps_one_user_agent() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = Arc::new(HttpClient::new(5, None, &[]).unwrap());
    let chosen = client.user_agent().unwrap().to_string();
    let base = TargetConfig::new(mock_server.uri()).base_request().unwrap();
    let policy = BurstPolicy::default();

    let burst = BurstDispatcher::new(client)
        .dispatch(&ScanContext::background(), &base, policy.calibration_plan(), None)
        .await;
    assert_eq!(burst.len(), policy.calibration_count);

    let agents: HashSet<String> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.headers.get("user-agent"))
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    assert_eq!(agents, HashSet::from([chosen]));
}

#[tokio::test]
async fn test_calibration_detects_intermittent_429() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(EveryFifthLimited { seen: AtomicUsize::new(0) })
        .mount(&mock_server)
        .await;

    let policy = BurstPolicy::default();
    let base = TargetConfig::new(mock_server.uri()).base_request().unwrap();
    let dispatcher = BurstDispatcher::new(executor());

    let calibration = dispatcher
        .dispatch(&ScanContext::background(), &base, policy.calibration_plan(), None)
        .await;
    assert_eq!(calibration.len(), 30);
    assert_eq!(calibration.status_count(429), 6);

    let verdict = RateLimitOracle::classify(&calibration);
    assert!(verdict.is_present());
    assert_eq!(verdict.limited_responses, 6);
}

#[tokio::test]
async fn test_eighty_percent_is_not_a_bypass() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(EveryFifthLimited { seen: AtomicUsize::new(0) })
        .mount(&mock_server)
        .await;

    let base = TargetConfig::new(mock_server.uri()).base_request().unwrap();
    let evaluator = BypassEvaluator::new(BurstDispatcher::new(executor()), BurstPolicy::default());

    let outcome = evaluator
        .evaluate(&ScanContext::background(), &base, BypassTechnique::HeaderPermutation)
        .await;
    assert_eq!(outcome.attempted, 30);
    assert_eq!(outcome.successes, 24);
    assert!(!outcome.bypassed);
    assert!(!outcome.inconclusive);
}

#[tokio::test]
async fn test_partial_limiter_yields_no_findings() {
    let mock_server = MockServer::start().await;
    Mock::given(any())
        .respond_with(EveryFifthLimited { seen: AtomicUsize::new(0) })
        .mount(&mock_server)
        .await;

    let policy = BurstPolicy::default();
    let tester = RateLimitTester::new(executor(), policy.clone());
    let result = tester
        .test(&ScanContext::background(), &TargetConfig::new(mock_server.uri()))
        .await
        .unwrap();

    assert!(result.findings().is_empty());
    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(
        received.len(),
        policy.calibration_count + BypassTechnique::ALL.len() * policy.bypass_count
    );
}
