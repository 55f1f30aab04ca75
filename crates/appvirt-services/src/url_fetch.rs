//! URL fetch service.
//!
//! Sends HTTP requests through the bridge transport.  When a token manager
//! is configured, requests carry its bearer token unless the caller passes
//! `useAuth: false`.  A 401 invalidates the cached token so the next call
//! fetches a fresh one; the failed request itself is not retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use appvirt_auth::TokenManager;
use appvirt_bridge::{FetchRequest, FetchResponse, HttpTransport};
use appvirt_kernel::{CallError, MethodSpec, Service, ServiceManifest};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::args::{optional_bool, optional_str, require_str};
use crate::drive::base_manifest;

/// Published service name.
pub const URL_FETCH_SERVICE: &str = "UrlFetch";

pub struct UrlFetchService {
    manifest: ServiceManifest,
    transport: HttpTransport,
    tokens: Option<Arc<TokenManager>>,
}

impl UrlFetchService {
    pub fn new(transport: HttpTransport, tokens: Option<Arc<TokenManager>>) -> Self {
        Self {
            manifest: manifest(),
            transport,
            tokens,
        }
    }

    /// Build the request described by `args`, without credentials.
    fn request(&self, args: &Value, method: &str) -> Result<FetchRequest, CallError> {
        let url = require_str(args, "url", method)?;
        let http_method = optional_str(args, "method", method)?.unwrap_or("GET");
        let mut request = FetchRequest::new(http_method.to_ascii_uppercase(), url);

        match args.get("headers") {
            None | Some(Value::Null) => {}
            Some(Value::Object(headers)) => {
                for (name, value) in headers {
                    let value = value.as_str().ok_or_else(|| {
                        CallError::invalid_args(method, format!("header `{name}` must be a string"))
                    })?;
                    request = request.with_header(name.as_str(), value);
                }
            }
            Some(_) => return Err(CallError::invalid_args(method, "field `headers` must be an object")),
        }

        match args.get("payload") {
            None | Some(Value::Null) => {}
            Some(Value::String(body)) => request = request.with_body(body.as_str()),
            Some(body) => {
                request = request
                    .with_header("content-type", "application/json")
                    .with_body(body.to_string());
            }
        }
        Ok(request)
    }

    fn bearer(&self, tokens: &Arc<TokenManager>) -> Result<String, CallError> {
        let tokens = Arc::clone(tokens);
        let token = self
            .transport
            .bridge()
            .run_sync("auth.token", async move { tokens.access_token().await })?;
        Ok(token)
    }

    fn fetch(&self, args: &Value) -> Result<Value, CallError> {
        let mut request = self.request(args, "fetch")?;
        let use_auth = optional_bool(args, "useAuth", true);
        let mute = optional_bool(args, "muteHttpExceptions", false);

        let tokens = self.tokens.as_ref().filter(|_| use_auth);
        if let Some(tokens) = tokens {
            request = request.with_bearer(self.bearer(tokens)?);
        }

        let url = request.url.clone();
        let response = self.transport.fetch(request)?;

        if response.status == 401 {
            if let Some(tokens) = tokens {
                warn!(url = %url, "request unauthorized; dropping cached token");
                let tokens = Arc::clone(tokens);
                self.transport
                    .bridge()
                    .run("auth.invalidate", async move { tokens.invalidate().await })?;
            }
        }

        if !response.is_success() && !mute {
            return Err(CallError::backend(format!(
                "request to {url} failed with status {}: {}",
                response.status,
                truncate(&response.body, 200)
            )));
        }

        debug!(url = %url, status = response.status, "fetch completed");
        Ok(response_json(&response))
    }
}

impl Service for UrlFetchService {
    fn name(&self) -> &str {
        URL_FETCH_SERVICE
    }

    fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CallError> {
        match method {
            "getName" | "toString" => Ok(json!(URL_FETCH_SERVICE)),
            "fetch" => self.fetch(args),
            "getRequest" => {
                let request = self.request(args, method)?;
                serde_json::to_value(&request).map_err(|e| CallError::backend(e.to_string()))
            }
            other => Err(CallError::Unsupported {
                method: other.to_string(),
            }),
        }
    }
}

fn response_json(response: &FetchResponse) -> Value {
    let headers: BTreeMap<&str, &str> = response
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    json!({
        "status": response.status,
        "headers": headers,
        "body": response.body,
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn manifest() -> ServiceManifest {
    ServiceManifest::new(URL_FETCH_SERVICE)
        .with_method(MethodSpec::read("fetch"))
        .with_method(MethodSpec::local("getRequest"))
        .extending(base_manifest())
}
