use reqwest::Method;

use crate::http::ProbeRequest;

/// Per-probe overrides handed out by a burst customizer.
///
/// Applying a mutation always yields a fresh request; the base request is
/// never edited in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeMutation {
    /// Inserted or replaced on the outgoing request.
    pub headers: Vec<(String, String)>,
    /// Appended to the query string after any existing pairs.
    pub query: Vec<(String, String)>,
    pub method: Option<Method>,
    /// Removed before `headers` are applied.
    pub remove_headers: Vec<String>,
}

impl ProbeMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn without_header(mut self, name: impl Into<String>) -> Self {
        self.remove_headers.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.query.is_empty()
            && self.method.is_none()
            && self.remove_headers.is_empty()
    }

    pub fn apply(&self, req: &ProbeRequest) -> ProbeRequest {
        let mut new_request = req.clone();

        if let Some(method) = &self.method {
            new_request.method = method.clone();
        }

        for name in &self.remove_headers {
            new_request.headers.remove(name.as_str());
        }

        for (name, value) in &self.headers {
            new_request.set_header(name, value);
        }

        if !self.query.is_empty() {
            let mut pairs = new_request.url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }

        new_request
    }
}

/// Names of the query parameters present on `req`, in order, without repeats.
pub fn query_param_names(req: &ProbeRequest) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (key, _value) in req.url.query_pairs() {
        if !names.iter().any(|n| n == key.as_ref()) {
            names.push(key.to_string());
        }
    }
    names
}

/// Copy of `req` with every value of `param_name` replaced by `payload`.
pub fn replace_query_param(req: &ProbeRequest, param_name: &str, payload: &str) -> ProbeRequest {
    let mut new_request = req.clone();

    let pairs: Vec<(String, String)> = new_request
        .url
        .query_pairs()
        .map(|(k, v)| {
            if k == param_name {
                (k.to_string(), payload.to_string())
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect();

    {
        let mut query = new_request.url.query_pairs_mut();
        query.clear();
        for (k, v) in pairs {
            query.append_pair(&k, &v);
        }
    }

    new_request
}
