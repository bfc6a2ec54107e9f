use async_trait::async_trait;
use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;

use super::{ProbeError, ProbeExecutor, ProbeRequest, ProbeResponse};

/// Default [`ProbeExecutor`] backed by `reqwest`.
///
/// Owns the per-probe timeout. Redirects are not followed so the status the
/// target actually sent is what the oracle sees. The User-Agent is chosen once
/// per client and reused for every request.
pub struct HttpClient {
    inner: Client,
    default_timeout: Duration,
    default_headers: HeaderMap,
}

impl HttpClient {
    pub fn new(
        timeout_seconds: u64,
        proxy_url: Option<&str>,
        custom_headers: &[(String, String)],
    ) -> Result<Self, ProbeError> {
        let timeout = Duration::from_secs(timeout_seconds.max(1));

        let mut builder = ClientBuilder::new()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = proxy_url {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        let inner = builder.build()?;

        let mut default_headers = HeaderMap::new();
        for (key, val) in custom_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(val),
            ) {
                default_headers.insert(name, value);
            }
        }
        if !default_headers.contains_key(USER_AGENT) {
            let agent = *USER_AGENTS.choose(&mut rand::rng()).unwrap_or(&"Mozilla/5.0");
            default_headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        }

        Ok(Self {
            inner,
            default_timeout: timeout,
            default_headers,
        })
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.default_headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
     Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

#[async_trait]
impl ProbeExecutor for HttpClient {
    async fn execute(&self, req: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        let mut builder = self.inner.request(req.method.clone(), req.url.as_str());

        for (name, value) in self.default_headers.iter() {
            if !req.headers.contains_key(name) {
                builder = builder.header(name, value);
            }
        }

        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }

        if let Some(body) = &req.body {
            if !req.headers.contains_key(CONTENT_TYPE) {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body.clone());
        }

        let response = builder.timeout(self.default_timeout).send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(ProbeResponse::new(status, headers, body))
    }
}
