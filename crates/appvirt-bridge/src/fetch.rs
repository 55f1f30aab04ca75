//! Authenticated HTTP requests performed through the bridge.
//!
//! [`HttpTransport`] is the network collaborator the services use: it
//! validates a [`FetchRequest`], sends it with `reqwest` on the bridge
//! runtime and blocks until the full [`FetchResponse`] is available.
//! Non-2xx statuses are returned as ordinary responses; only failures to
//! talk to the server at all become errors.  There are no retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::bridge::SyncBridge;
use crate::error::{BridgeError, Result};

/// Maximum response body size in bytes (10 MB).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// HTTP method, case-insensitive.
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Bearer token sent as the `Authorization` header.
    #[serde(default, skip_serializing)]
    pub bearer: Option<String>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new("POST", url).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Blocking HTTP client backed by the bridge runtime.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    bridge: Arc<SyncBridge>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(bridge: Arc<SyncBridge>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("appvirt/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { bridge, client }
    }

    /// The bridge requests run on.
    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.bridge
    }

    /// Perform `request` and block until the whole response is read.
    pub fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let builder = self.build(&request)?;
        let url = request.url;

        self.bridge.run("http.fetch", async move {
            let start = Instant::now();
            let mut response = builder.send().await.map_err(|e| BridgeError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();

            if let Some(reason) = response.content_length().and_then(body_limit_exceeded) {
                return Err(BridgeError::Http { url, reason });
            }

            let mut bytes = Vec::new();
            while let Some(chunk) = response.chunk().await.map_err(|e| BridgeError::Http {
                url: url.clone(),
                reason: format!("failed to read response body: {e}"),
            })? {
                let total = (bytes.len() + chunk.len()) as u64;
                if let Some(reason) = body_limit_exceeded(total) {
                    return Err(BridgeError::Http { url, reason });
                }
                bytes.extend_from_slice(&chunk);
            }

            debug!(
                url = %url,
                status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                body_length = bytes.len(),
                "http request completed"
            );

            Ok::<_, BridgeError>(FetchResponse {
                status,
                headers,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            })
        })?
    }

    fn build(&self, request: &FetchRequest) -> Result<reqwest::RequestBuilder> {
        let method = parse_method(&request.method).ok_or_else(|| BridgeError::InvalidRequest {
            reason: format!(
                "unsupported HTTP method `{}`. Supported: GET, POST, PUT, PATCH, DELETE, HEAD",
                request.method
            ),
        })?;

        let url = url::Url::parse(&request.url).map_err(|e| BridgeError::InvalidRequest {
            reason: format!("invalid URL `{}`: {e}", request.url),
        })?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                BridgeError::InvalidRequest {
                    reason: format!("invalid header name `{name}`: {e}"),
                }
            })?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                BridgeError::InvalidRequest {
                    reason: format!("invalid header value for `{name}`: {e}"),
                }
            })?;
            builder = builder.header(name, value);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

/// Why a body of `len` bytes is refused, if it is.
fn body_limit_exceeded(len: u64) -> Option<String> {
    (len > MAX_BODY_BYTES as u64).then(|| format!("response body exceeds {MAX_BODY_BYTES} bytes"))
}

/// Parse an HTTP method string into a `reqwest::Method`.
fn parse_method(method: &str) -> Option<reqwest::Method> {
    match method.to_uppercase().as_str() {
        "GET" => Some(reqwest::Method::GET),
        "POST" => Some(reqwest::Method::POST),
        "PUT" => Some(reqwest::Method::PUT),
        "PATCH" => Some(reqwest::Method::PATCH),
        "DELETE" => Some(reqwest::Method::DELETE),
        "HEAD" => Some(reqwest::Method::HEAD),
        _ => None,
    }
}
