use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

use crate::core::bypass::{BypassEvaluator, BypassOutcome};
use crate::core::context::ScanContext;
use crate::core::dispatcher::BurstDispatcher;
use crate::core::error::TesterError;
use crate::core::oracle::{RateLimitOracle, RateLimitSignal};
use crate::core::registry::VulnerabilityTester;
use crate::core::result::{Finding, TestResult};
use crate::core::VulnerabilityType;
use crate::http::{ProbeExecutor, ProbeRequest};
use crate::{BurstPolicy, TargetConfig};

const NAME: &str = "rate-limit";

/// Detects a rate limiter with a calibration burst, then tries every bypass
/// technique against it. Each technique that gets through is one finding.
///
/// A target without any limiter yields no findings.
pub struct RateLimitTester {
    dispatcher: BurstDispatcher,
    policy: BurstPolicy,
}

impl RateLimitTester {
    pub fn new(executor: Arc<dyn ProbeExecutor>, policy: BurstPolicy) -> Self {
        Self {
            dispatcher: BurstDispatcher::new(executor),
            policy,
        }
    }

    fn bypass_finding(base: &ProbeRequest, signal: &RateLimitSignal, outcome: &BypassOutcome) -> Finding {
        let technique = outcome.technique;
        let sample = base.mutated(&technique.customizer()(0));

        Finding::builder(VulnerabilityType::LackOfRateLimiting, format!("Rate Limit Bypass: {}", technique.name()))
            .description(technique.description())
            .severity(technique.severity())
            .request(&sample)
            .evidence(format!("limiter detected via {}; {}", signal, outcome.evidence()))
            .remediation(
                "Key rate limits on the authenticated principal or the real peer address. \
                 Ignore client-supplied forwarding headers unless set by a trusted proxy, \
                 normalise query strings and apply limits to every HTTP method.",
            )
            .score(technique.score())
            .cwe("CWE-770")
            .reference("https://owasp.org/API-Security/editions/2023/en/0xa4-unrestricted-resource-consumption/")
            .reference("https://cwe.mitre.org/data/definitions/770.html")
            .build()
    }
}

#[async_trait]
impl VulnerabilityTester for RateLimitTester {
    async fn test(&self, ctx: &ScanContext, target: &TargetConfig) -> Result<TestResult, TesterError> {
        let base = target.base_request()?;
        let mut result = TestResult::start(NAME);

        info!("[RateLimit] Calibrating with {} probe(s) against {}", self.policy.calibration_count, base.url);
        let calibration = self
            .dispatcher
            .dispatch(ctx, &base, self.policy.calibration_plan(), None)
            .await;

        if !calibration.is_conclusive() {
            warn!(
                "[RateLimit] Calibration inconclusive ({}/{} responses{})",
                calibration.len(),
                calibration.attempted,
                if calibration.cancelled { ", cancelled" } else { "" }
            );
            result.mark_inconclusive();
            return Ok(result.finish());
        }

        let verdict = RateLimitOracle::classify(&calibration);
        let signal = match verdict.signal {
            Some(signal) => signal,
            None => {
                info!("[RateLimit] No rate limiting detected - skipping bypass tests");
                return Ok(result.finish());
            }
        };

        info!(
            "[RateLimit] Rate limiting detected via {} ({} limited response(s)), testing bypass techniques",
            signal, verdict.limited_responses
        );

        let evaluator = BypassEvaluator::new(self.dispatcher.clone(), self.policy.clone());
        for outcome in evaluator.evaluate_all(ctx, &base).await {
            if outcome.inconclusive {
                result.mark_inconclusive();
            } else if outcome.bypassed {
                info!("[RateLimit] Bypass found: {}", outcome.technique.name());
                result.add_finding(Self::bypass_finding(&base, &signal, &outcome));
            }
        }

        if ctx.is_cancelled() {
            result.mark_inconclusive();
        }

        Ok(result.finish())
    }

    fn vuln_type(&self) -> VulnerabilityType {
        VulnerabilityType::LackOfRateLimiting
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Detects rate limiting with a calibration burst and tests six bypass techniques against it"
    }
}
