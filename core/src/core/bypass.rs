use std::sync::Arc;

use log::{debug, info};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::core::context::ScanContext;
use crate::core::dispatcher::{BurstDispatcher, BurstPlan, Customizer};
use crate::core::mutator::ProbeMutation;
use crate::core::Severity;
use crate::http::ProbeRequest;
use crate::BurstPolicy;

/// Request-mutation strategies tried against a detected limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassTechnique {
    IpRotation,
    HeaderPermutation,
    ParameterPollution,
    MethodRotation,
    DistributedFanOut,
    CacheBusting,
}

const ROTATION_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "curl/8.4.0",
    "PostmanRuntime/7.36.0",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "de-DE,de;q=0.8", "fr-FR,fr;q=0.7", "ja-JP"];

const ROTATION_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

const FAN_OUT_IDENTITY_HEADERS: &[&str] = &[
    "X-Forwarded-For",
    "X-Real-IP",
    "X-Client-IP",
    "X-Originating-IP",
    "True-Client-IP",
    "CF-Connecting-IP",
];

impl BypassTechnique {
    /// Evaluation order.
    pub const ALL: [BypassTechnique; 6] = [
        BypassTechnique::IpRotation,
        BypassTechnique::HeaderPermutation,
        BypassTechnique::ParameterPollution,
        BypassTechnique::MethodRotation,
        BypassTechnique::DistributedFanOut,
        BypassTechnique::CacheBusting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BypassTechnique::IpRotation => "IP Header Rotation",
            BypassTechnique::HeaderPermutation => "User-Agent/Header Permutation",
            BypassTechnique::ParameterPollution => "Parameter Pollution",
            BypassTechnique::MethodRotation => "HTTP Method Rotation",
            BypassTechnique::DistributedFanOut => "Distributed Fan-Out",
            BypassTechnique::CacheBusting => "Cache Busting",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BypassTechnique::IpRotation => {
                "The limiter trusts client-supplied X-Forwarded-For / X-Real-IP headers, so every spoofed address gets a fresh quota."
            }
            BypassTechnique::HeaderPermutation => {
                "The limiter keys on User-Agent or other client-controlled headers, so rotating them resets the quota."
            }
            BypassTechnique::ParameterPollution => {
                "Adding a unique dummy query parameter makes each request look distinct to the limiter."
            }
            BypassTechnique::MethodRotation => {
                "The limit is only enforced for some HTTP methods; rotating methods avoids it."
            }
            BypassTechnique::DistributedFanOut => {
                "Simultaneous requests with spoofed identity headers look like many distinct clients to the limiter."
            }
            BypassTechnique::CacheBusting => {
                "Cache-busting parameters and no-cache directives cause requests to be counted separately or skip the limiter entirely."
            }
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            BypassTechnique::IpRotation | BypassTechnique::DistributedFanOut => Severity::High,
            _ => Severity::Medium,
        }
    }

    pub fn score(&self) -> f32 {
        match self.severity() {
            Severity::High => 7.5,
            _ => 5.3,
        }
    }

    /// Burst shape for this technique; distributed fan-out fires everything at once.
    pub fn plan(&self, policy: &BurstPolicy) -> BurstPlan {
        let plan = policy.bypass_plan();
        match self {
            BypassTechnique::DistributedFanOut => BurstPlan {
                concurrency: plan.count.max(1),
                ..plan
            },
            _ => plan,
        }
    }

    /// Per-probe mutation function fed to the dispatcher.
    pub fn customizer(&self) -> Customizer {
        match self {
            BypassTechnique::IpRotation => Arc::new(|i: usize| {
                let ip = spoofed_ip(10, i);
                ProbeMutation::new()
                    .header("X-Forwarded-For", ip.clone())
                    .header("X-Real-IP", ip)
            }),
            BypassTechnique::HeaderPermutation => Arc::new(|i: usize| {
                ProbeMutation::new()
                    .header("User-Agent", ROTATION_USER_AGENTS[i % ROTATION_USER_AGENTS.len()])
                    .header("Accept-Language", ACCEPT_LANGUAGES[i % ACCEPT_LANGUAGES.len()])
            }),
            BypassTechnique::ParameterPollution => {
                Arc::new(|i: usize| ProbeMutation::new().query(format!("_pp{}", i), i.to_string()))
            }
            BypassTechnique::MethodRotation => Arc::new(|i: usize| {
                let method = ROTATION_METHODS[i % ROTATION_METHODS.len()];
                ProbeMutation::new().method(Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET))
            }),
            BypassTechnique::DistributedFanOut => Arc::new(|i: usize| {
                let ip = spoofed_ip(172, i);
                FAN_OUT_IDENTITY_HEADERS
                    .iter()
                    .fold(ProbeMutation::new(), |m, name| m.header(*name, ip.clone()))
            }),
            BypassTechnique::CacheBusting => {
                let epoch_ms = chrono::Utc::now().timestamp_millis();
                Arc::new(move |i: usize| {
                    ProbeMutation::new()
                        .query("_cb", (epoch_ms + i as i64).to_string())
                        .header("Cache-Control", "no-cache, no-store")
                        .header("Pragma", "no-cache")
                })
            }
        }
    }
}

impl std::fmt::Display for BypassTechnique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Unique private address for probe `i` under the first octet `prefix`.
fn spoofed_ip(prefix: u8, i: usize) -> String {
    let n = (i as u32).wrapping_add(1);
    format!("{}.{}.{}.{}", prefix, (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff)
}

/// Strict-threshold verdict over *attempted* probes.
pub fn is_bypassed(successes: usize, attempted: usize, threshold: f64) -> bool {
    if attempted == 0 {
        return false;
    }
    successes as f64 / attempted as f64 > threshold
}

/// Result of running one technique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassOutcome {
    pub technique: BypassTechnique,
    pub attempted: usize,
    pub responses: usize,
    pub successes: usize,
    pub ratio: f64,
    pub bypassed: bool,
    /// The burst was cancelled, so `bypassed` is always false.
    pub inconclusive: bool,
}

impl BypassOutcome {
    pub fn evidence(&self) -> String {
        format!(
            "{}/{} probes returned 2xx ({:.1}%) using {} after rate limiting was detected",
            self.successes,
            self.attempted,
            self.ratio * 100.0,
            self.technique.name()
        )
    }
}

/// Re-runs bursts with each technique's mutations applied.
pub struct BypassEvaluator {
    dispatcher: BurstDispatcher,
    policy: BurstPolicy,
}

impl BypassEvaluator {
    pub fn new(dispatcher: BurstDispatcher, policy: BurstPolicy) -> Self {
        Self { dispatcher, policy }
    }

    pub async fn evaluate(
        &self,
        ctx: &ScanContext,
        base: &ProbeRequest,
        technique: BypassTechnique,
    ) -> BypassOutcome {
        let plan = technique.plan(&self.policy);
        let burst = self
            .dispatcher
            .dispatch(ctx, base, plan, Some(technique.customizer()))
            .await;

        let successes = burst.success_count();
        let inconclusive = burst.cancelled;
        let bypassed =
            !inconclusive && is_bypassed(successes, burst.attempted, self.policy.success_threshold);

        debug!(
            "{}: {}/{} success(es), {} response(s), bypassed={}",
            technique.name(),
            successes,
            burst.attempted,
            burst.len(),
            bypassed
        );

        BypassOutcome {
            technique,
            attempted: burst.attempted,
            responses: burst.len(),
            successes,
            ratio: burst.success_ratio(),
            bypassed,
            inconclusive,
        }
    }

    /// Runs the whole catalog in order. Stops early once the context is
    /// cancelled.
    pub async fn evaluate_all(&self, ctx: &ScanContext, base: &ProbeRequest) -> Vec<BypassOutcome> {
        let mut outcomes = Vec::with_capacity(BypassTechnique::ALL.len());
        for technique in BypassTechnique::ALL {
            if ctx.is_cancelled() {
                break;
            }
            info!("[RateLimit] Testing bypass technique: {}", technique.name());
            outcomes.push(self.evaluate(ctx, base, technique).await);
        }
        outcomes
    }
}
