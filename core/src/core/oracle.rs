/// Rate-limit presence classifier.
///
/// Looks for the 429 sentinel first, then for any conventional rate-limit
/// header. A limiter that uses neither within the sampled burst is reported as
/// absent; that false negative is a known limitation of the heuristic.

use serde::{Deserialize, Serialize};

use crate::core::dispatcher::BurstResult;

pub const TOO_MANY_REQUESTS: u16 = 429;

/// Header names (lowercase) that signal an active limiter.
pub const RATE_LIMIT_HEADERS: &[&str] = &[
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
    "x-rate-limit-limit",
    "x-rate-limit-remaining",
    "x-rate-limit-reset",
    "ratelimit-limit",
    "ratelimit-remaining",
    "ratelimit-reset",
    "ratelimit-policy",
    "retry-after",
];

/// What convinced the oracle that limiting is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitSignal {
    StatusCode(u16),
    Header(String),
}

impl std::fmt::Display for RateLimitSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitSignal::StatusCode(code) => write!(f, "HTTP {}", code),
            RateLimitSignal::Header(name) => write!(f, "header '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitVerdict {
    /// `Some` iff rate limiting is present.
    pub signal: Option<RateLimitSignal>,
    /// Number of sentinel-status responses in the burst.
    pub limited_responses: usize,
}

impl RateLimitVerdict {
    pub fn is_present(&self) -> bool {
        self.signal.is_some()
    }
}

pub struct RateLimitOracle;

impl RateLimitOracle {
    pub fn classify(burst: &BurstResult) -> RateLimitVerdict {
        let limited_responses = burst.status_count(TOO_MANY_REQUESTS);

        if limited_responses > 0 {
            return RateLimitVerdict {
                signal: Some(RateLimitSignal::StatusCode(TOO_MANY_REQUESTS)),
                limited_responses,
            };
        }

        let header = burst.responses.iter().find_map(|resp| {
            resp.headers
                .keys()
                .map(|name| name.as_str())
                .find(|name| is_rate_limit_header(name))
                .map(|name| name.to_string())
        });

        RateLimitVerdict {
            signal: header.map(RateLimitSignal::Header),
            limited_responses,
        }
    }
}

pub fn is_rate_limit_header(name: &str) -> bool {
    RATE_LIMIT_HEADERS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}
