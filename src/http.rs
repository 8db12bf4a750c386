//! Minimal HTTP request helper.
//!
//! [`ApiRequest`] describes one call: base URI plus path, a case-insensitive
//! method name, and a flat parameter map. For GET, DELETE and HEAD the
//! parameters go into the query string; for POST, PUT and PATCH they form the
//! body (JSON by default, or url-encoded form).

use crate::config::DEFAULT_HTTP_TIMEOUT_SECS;
use crate::error::{HttpError, HttpResult};
use bytes::Bytes;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Body encoding for methods that carry one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentType {
    #[default]
    Json,
    Form,
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Prefix joined with `url`; may be empty when `url` is absolute
    pub base_uri: String,
    pub url: String,
    /// Method name, e.g. `get` or `POST`
    pub method: String,
    pub params: Map<String, Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
    pub content_type: ContentType,
}

impl Default for ApiRequest {
    fn default() -> Self {
        Self {
            base_uri: String::new(),
            url: String::new(),
            method: "get".to_string(),
            params: Map::new(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            content_type: ContentType::default(),
        }
    }
}

/// Response returned for every status code; only transport failures are errors.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> HttpResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// `base_uri` and `url` joined by exactly one `/`.
    pub fn full_url(&self) -> String {
        match (self.base_uri.is_empty(), self.url.is_empty()) {
            (true, _) => self.url.clone(),
            (false, true) => self.base_uri.clone(),
            (false, false) => format!(
                "{}/{}",
                self.base_uri.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            ),
        }
    }

    /// Parse the method name case-insensitively.
    pub fn http_method(&self) -> HttpResult<Method> {
        match self.method.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            _ => Err(HttpError::invalid_method(&self.method)),
        }
    }

    /// Send with a fresh client.
    pub async fn send(&self) -> HttpResult<ApiResponse> {
        self.send_with(&Client::new()).await
    }

    /// Send with a caller-provided client (shares its connection pool).
    pub async fn send_with(&self, client: &Client) -> HttpResult<ApiResponse> {
        let method = self.http_method()?;
        let full_url = self.full_url();
        let mut url =
            Url::parse(&full_url).map_err(|e| HttpError::invalid_url(&full_url, e.to_string()))?;

        let carries_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        if !carries_body && !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.param_pairs());
        }

        debug!(method = %method, url = %url, "Sending HTTP request");
        let started = Instant::now();

        let mut builder = client.request(method.clone(), url).timeout(self.timeout);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if carries_body {
            builder = match self.content_type {
                ContentType::Json => builder.json(&self.params),
                ContentType::Form => builder.form(&self.param_pairs()),
            };
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!(
            method = %method,
            status,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HTTP response received"
        );

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Parameters flattened to strings; strings are used verbatim, null becomes empty.
    fn param_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}
