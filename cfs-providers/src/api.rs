// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chef server REST access
//!
//! Every server-backed entry talks to the server through [`ChefApi`]. Paths
//! are relative to the organization URL (`roles/web`, `data/users`); blob
//! URLs handed out by the server in manifests and sandboxes are absolute.
//! Request signing is left to whatever sits in front of [`HttpApi`].

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::BackendError;
use reqwest::{header, Client, Method, RequestBuilder};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// JSON-in, JSON-out access to one Chef server organization
#[async_trait]
pub trait ChefApi: Send + Sync + fmt::Debug {
    async fn get(&self, path: &str) -> Result<Value, BackendError>;

    async fn put(&self, path: &str, body: &Value) -> Result<Value, BackendError>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value, BackendError>;

    async fn delete(&self, path: &str) -> Result<Value, BackendError>;

    /// Download a blob
    async fn get_raw(&self, url: &str) -> Result<Bytes, BackendError>;

    /// Upload a blob to a sandbox URL
    async fn put_raw(&self, url: &str, content: Bytes) -> Result<(), BackendError>;
}

/// [`ChefApi`] over HTTP with reqwest
#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: String,
    node_name: Option<String>,
    http: Client,
}

impl HttpApi {
    pub fn new(
        base_url: impl Into<String>,
        node_name: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            node_name,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header(header::ACCEPT, "application/json")
            .header("X-Chef-Version", env!("CARGO_PKG_VERSION"));
        if let Some(node_name) = &self.node_name {
            request = request.header("X-Ops-UserId", node_name);
        }
        request
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Bytes, BackendError> {
        tracing::debug!("{}", what);
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            let message = error_message(&body);
            tracing::warn!("{} failed with HTTP {}: {}", what, status.as_u16(), message);
            return Err(BackendError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }

    async fn send_json(&self, request: RequestBuilder, what: &str) -> Result<Value, BackendError> {
        let body = self.send(request, what).await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(e.to_string())
    }
}

/// Message of a Chef error body: `{"error": ["a", "b"]}` becomes `a, b`.
/// Anything else is returned as text.
pub(crate) fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("error") {
            Some(Value::Array(errors)) => errors
                .iter()
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
            Some(Value::String(error)) => error.clone(),
            _ => Value::Object(map).to_string(),
        },
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

#[async_trait]
impl ChefApi for HttpApi {
    async fn get(&self, path: &str) -> Result<Value, BackendError> {
        let what = format!("GET {}", self.url(path));
        self.send_json(self.request(Method::GET, path), &what).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        let what = format!("PUT {}", self.url(path));
        self.send_json(self.request(Method::PUT, path).json(body), &what).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        let what = format!("POST {}", self.url(path));
        self.send_json(self.request(Method::POST, path).json(body), &what).await
    }

    async fn delete(&self, path: &str) -> Result<Value, BackendError> {
        let what = format!("DELETE {}", self.url(path));
        self.send_json(self.request(Method::DELETE, path), &what).await
    }

    async fn get_raw(&self, url: &str) -> Result<Bytes, BackendError> {
        let what = format!("GET {}", url);
        self.send(self.request(Method::GET, url), &what).await
    }

    async fn put_raw(&self, url: &str, content: Bytes) -> Result<(), BackendError> {
        let what = format!("PUT {} ({} bytes)", url, content.len());
        let request = self
            .request(Method::PUT, url)
            .header(header::CONTENT_TYPE, "application/x-binary")
            .body(content);
        self.send(request, &what).await.map(|_| ())
    }
}
