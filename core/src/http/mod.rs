pub mod client;

pub use client::HttpClient;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::mutator::ProbeMutation;

/// Transport-level failure reported by a [`ProbeExecutor`].
///
/// Opaque to everything above the executor: a failed probe is skipped, never
/// escalated.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("probe failed: {0}")]
    Other(String),
}

/// Executes one probe. No retries, no caching.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn execute(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError>;
}

/// An HTTP-shaped request sent against the target.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl ProbeRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Builder-style header insert. Invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Inserts (or replaces) a header. Returns false if the pair is not valid HTTP.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a new request with `mutation` applied; `self` is left untouched.
    pub fn mutated(&self, mutation: &ProbeMutation) -> ProbeRequest {
        mutation.apply(self)
    }

    pub fn headers_vec(&self) -> Vec<(String, String)> {
        headers_to_vec(&self.headers)
    }
}

/// A response as observed by the executor. Read-only to the core.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl ProbeResponse {
    /// Builds a response, deriving content type/length from the headers.
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());

        Self {
            status,
            headers,
            body,
            content_type,
            content_length,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// First value of `name`, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of `name` in arrival order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }
}

/// Serializable snapshot of the request that triggered a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl From<&ProbeRequest> for RequestSnapshot {
    fn from(req: &ProbeRequest) -> Self {
        Self {
            method: req.method.to_string(),
            url: req.url.to_string(),
            headers: req.headers_vec(),
            body: req
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// Serializable snapshot of the response that triggered a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body_excerpt: String,
}

const BODY_EXCERPT_LIMIT: usize = 512;

impl From<&ProbeResponse> for ResponseSnapshot {
    fn from(resp: &ProbeResponse) -> Self {
        let text = resp.body_text();
        let body_excerpt = match text.char_indices().nth(BODY_EXCERPT_LIMIT) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text,
        };
        Self {
            status: resp.status,
            headers: headers_to_vec(&resp.headers),
            content_type: resp.content_type.clone(),
            content_length: resp.content_length,
            body_excerpt,
        }
    }
}

pub(crate) fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}
