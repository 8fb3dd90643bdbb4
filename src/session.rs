//! HTTP session handed to the user function on every attempt.
//!
//! A [`Session`] is a cheap handle over one shared `reqwest::Client`, so connection pooling and
//! TLS settings are the same for every attempt of every request a [`Client`](crate::Client) runs.
//! The session does not retry or throttle on its own; that is the dispatcher's job.

use crate::error::ConfigError;
use reqwest::{IntoUrl, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Verb-based request methods bound to the configured transport.
#[derive(Debug, Clone)]
pub struct Session {
    http: reqwest::Client,
}

impl Session {
    /// Build a transport. `verify_tls = false` accepts invalid server certificates.
    pub fn new(verify_tls: bool, timeout: Option<Duration>) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self { http: builder.build()? })
    }

    /// Wrap an already configured client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// The underlying client.
    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.post(url)
    }

    pub fn put<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.put(url)
    }

    pub fn patch<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.patch(url)
    }

    pub fn delete<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.delete(url)
    }

    pub fn head<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.http.head(url)
    }

    /// Send a request, turning 4xx/5xx statuses into errors.
    ///
    /// Returning that error from the user function makes the attempt a retryable failure.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, reqwest::Error> {
        request.send().await?.error_for_status()
    }

    /// Send an [`HttpRequest`] and decode a JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &HttpRequest,
    ) -> Result<T, reqwest::Error> {
        self.send(self.prepare(request)).await?.json().await
    }

    /// Send an [`HttpRequest`] and return the body as text.
    pub async fn fetch_text(&self, request: &HttpRequest) -> Result<String, reqwest::Error> {
        self.send(self.prepare(request)).await?.text().await
    }

    /// Turn an [`HttpRequest`] into a ready-to-send builder. Malformed URLs or headers surface
    /// as errors when the builder is sent.
    pub fn prepare(&self, request: &HttpRequest) -> RequestBuilder {
        let mut builder = self.http.request(request.method.clone(), request.url.as_str());
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

/// Serializable request description, the typed form of `{"url", "params", "body"}` dicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    #[serde(default = "default_method", with = "method_serde")]
    pub method: Method,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

fn default_method() -> Method {
    Method::GET
}

mod method_serde {
    use reqwest::Method;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Method, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(de::Error::custom)
    }
}
