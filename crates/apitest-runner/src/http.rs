//! Blocking HTTP driver
//!
//! [`Driver`] is the transport seam the executor consumes; the production
//! implementation wraps a blocking reqwest client. Tests swap in a scripted
//! double.

use std::collections::HashMap;
use std::time::Duration;

use http::HeaderMap;
use serde_json::Value;

/// One fully-expanded request.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, Value>,
    pub body: Option<Value>,
    /// `"bearer <token>"` or `"basic <user:pass>"`; empty means none
    pub auth: String,
    pub timeout: Duration,
}

/// What came back.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body_bytes: Vec<u8>,
    /// Decoded body: `{}` for an empty body, `{"text": raw}` for non-JSON
    pub body_json: Value,
    pub body_text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("invalid method {0:?}")]
    Method(String),
    #[error("invalid auth format {0:?}")]
    AuthFormat(String),
    #[error("unsupported auth scheme {0:?}")]
    AuthScheme(String),
    #[error("encode request body: {0}")]
    Body(String),
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Transport capability: issue one request, return the response or a
/// transport-level error. Implementations must be shareable across the
/// scheduler's worker threads.
pub trait Driver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`HttpError`] when the request cannot be built or completed.
    fn send(&self, spec: &RequestSpec) -> Result<HttpResponse, HttpError>;
}

/// Production driver over `reqwest::blocking`. Follows redirects with the
/// client default policy; the per-request deadline comes from the spec.
pub struct ReqwestDriver {
    client: reqwest::blocking::Client,
}

impl ReqwestDriver {
    /// # Errors
    ///
    /// Returns [`HttpError`] if the underlying client cannot be built.
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self { client })
    }
}

impl Driver for ReqwestDriver {
    fn send(&self, spec: &RequestSpec) -> Result<HttpResponse, HttpError> {
        let method = reqwest::Method::from_bytes(spec.method.as_bytes())
            .map_err(|_| HttpError::Method(spec.method.clone()))?;

        let timeout = if spec.timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            spec.timeout
        };
        let mut req = self.client.request(method, &spec.url).timeout(timeout);

        for (key, value) in &spec.headers {
            req = req.header(key, value);
        }
        if !has_header(&spec.headers, "accept") {
            req = req.header("Accept", "application/json");
        }

        for (key, raw) in &spec.query {
            match raw {
                Value::Array(items) => {
                    for item in items {
                        req = req.query(&[(key, apitest_core::stringify(item))]);
                    }
                }
                other => {
                    req = req.query(&[(key, apitest_core::stringify(other))]);
                }
            }
        }

        if let Some(body) = &spec.body {
            if !has_header(&spec.headers, "content-type") {
                req = req.header("Content-Type", "application/json");
            }
            match body {
                Value::String(raw) => req = req.body(raw.clone()),
                other => {
                    let encoded =
                        serde_json::to_vec(other).map_err(|e| HttpError::Body(e.to_string()))?;
                    req = req.body(encoded);
                }
            }
        }

        req = apply_auth(req, &spec.auth)?;

        let resp = req.send()?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body_bytes = resp.bytes()?.to_vec();
        let body_text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body_json = decode_json(&body_text);

        Ok(HttpResponse {
            status,
            headers,
            body_bytes,
            body_json,
            body_text,
        })
    }
}

fn apply_auth(
    req: reqwest::blocking::RequestBuilder,
    auth: &str,
) -> Result<reqwest::blocking::RequestBuilder, HttpError> {
    let value = auth.trim();
    if value.is_empty() {
        return Ok(req);
    }
    let Some((scheme, rest)) = value.split_once(' ') else {
        return Err(HttpError::AuthFormat(auth.to_string()));
    };
    match scheme.trim().to_ascii_lowercase().as_str() {
        "bearer" => Ok(req.bearer_auth(rest.trim())),
        "basic" => {
            let credentials = rest.trim();
            match credentials.split_once(':') {
                Some((user, pass)) => Ok(req.basic_auth(user, Some(pass))),
                None => Ok(req.basic_auth(credentials, None::<&str>)),
            }
        }
        _ => Err(HttpError::AuthScheme(scheme.to_string())),
    }
}

/// Decode a response body: empty → `{}`, JSON → the value, anything else →
/// `{"text": <trimmed raw>}`.
pub(crate) fn decode_json(body: &str) -> Value {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => serde_json::json!({ "text": trimmed }),
    }
}

fn has_header(headers: &HashMap<String, String>, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

/// Join a base URL and a path; absolute paths pass through unchanged.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Normalize a method: trimmed, uppercased, GET when empty.
#[must_use]
pub fn effective_method(method: &str) -> String {
    let trimmed = method.trim();
    if trimmed.is_empty() {
        "GET".to_string()
    } else {
        trimmed.to_ascii_uppercase()
    }
}
