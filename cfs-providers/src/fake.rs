// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory Chef server for tests

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::BackendError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::api::ChefApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
}

impl Call {
    pub fn new(method: &'static str, path: &str) -> Self {
        Self { method, path: path.to_string() }
    }
}

/// Documents by path, blobs by URL, and a log of every request
#[derive(Debug, Default)]
pub struct FakeApi {
    docs: Mutex<BTreeMap<String, Value>>,
    post_responses: Mutex<HashMap<String, Value>>,
    blobs: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<(&'static str, String), u16>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, path: &str, value: Value) {
        self.docs.lock().insert(path.to_string(), value);
    }

    pub fn doc(&self, path: &str) -> Option<Value> {
        self.docs.lock().get(path).cloned()
    }

    /// Canned response for a POST instead of storing the body
    pub fn respond_to_post(&self, path: &str, value: Value) {
        self.post_responses.lock().insert(path.to_string(), value);
    }

    pub fn set_blob(&self, url: &str, content: impl Into<Bytes>) {
        self.blobs.lock().insert(url.to_string(), content.into());
    }

    pub fn blob(&self, url: &str) -> Option<Bytes> {
        self.blobs.lock().get(url).cloned()
    }

    /// Make `method path` answer with `status`
    pub fn fail(&self, method: &'static str, path: &str, status: u16) {
        self.failures.lock().insert((method, path.to_string()), status);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &'static str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method)
            .map(|c| c.path.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn begin(&self, method: &'static str, path: &str) -> Result<(), BackendError> {
        self.calls.lock().push(Call::new(method, path));
        match self.failures.lock().get(&(method, path.to_string())) {
            Some(status) => Err(BackendError::Http {
                status: *status,
                message: format!("{} {} failed", method, path),
            }),
            None => Ok(()),
        }
    }

    fn missing(path: &str) -> BackendError {
        BackendError::Http { status: 404, message: format!("{} not found", path) }
    }
}

#[async_trait]
impl ChefApi for FakeApi {
    async fn get(&self, path: &str) -> Result<Value, BackendError> {
        self.begin("GET", path)?;
        self.doc(path).ok_or_else(|| Self::missing(path))
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        self.begin("PUT", path)?;
        self.set(path, body.clone());
        Ok(body.clone())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        self.begin("POST", path)?;
        if let Some(response) = self.post_responses.lock().get(path) {
            return Ok(response.clone());
        }
        let key = body
            .get("id")
            .or_else(|| body.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let target = format!("{}/{}", path, key);
        let mut docs = self.docs.lock();
        if docs.contains_key(&target) {
            return Err(BackendError::Http { status: 409, message: format!("{} exists", target) });
        }
        docs.insert(target, body.clone());
        Ok(body.clone())
    }

    async fn delete(&self, path: &str) -> Result<Value, BackendError> {
        self.begin("DELETE", path)?;
        self.docs.lock().remove(path).ok_or_else(|| Self::missing(path))
    }

    async fn get_raw(&self, url: &str) -> Result<Bytes, BackendError> {
        self.begin("GET", url)?;
        self.blob(url).ok_or_else(|| Self::missing(url))
    }

    async fn put_raw(&self, url: &str, content: Bytes) -> Result<(), BackendError> {
        self.begin("PUT", url)?;
        self.set_blob(url, content);
        Ok(())
    }
}
