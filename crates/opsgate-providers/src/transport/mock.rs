//! Mock transport for testing

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opsgate_core::{BackendError, BackendResult};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{Query, RestTransport};

#[derive(Debug, Clone)]
enum Reply {
    Json(Value),
    Text(String),
    Error(BackendError),
}

/// One request seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RecordedRequest {
    /// Value of the first query parameter called `name`
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted transport.
///
/// Replies are queued per path. Each request consumes the head of its queue
/// except the last reply, which repeats. Unscripted paths answer HTTP 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: RwLock<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a JSON body for `path`
    pub fn on_json(&self, path: &str, body: Value) -> &Self {
        self.push(path, Reply::Json(body))
    }

    /// Queue a text body for `path`
    pub fn on_text(&self, path: &str, body: impl Into<String>) -> &Self {
        self.push(path, Reply::Text(body.into()))
    }

    /// Queue a failure for `path`
    pub fn on_error(&self, path: &str, error: BackendError) -> &Self {
        self.push(path, Reply::Error(error))
    }

    fn push(&self, path: &str, reply: Reply) -> &Self {
        self.routes
            .write()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request received so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn reply(&self, path: &str, query: Query<'_>) -> BackendResult<Reply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(RecordedRequest {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut routes = self.routes.write();
        let queue = routes
            .get_mut(path)
            .ok_or_else(|| BackendError::http(404, format!("No mock route for {}", path)))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.ok_or_else(|| BackendError::http(404, format!("No mock route for {}", path)))
    }
}

#[async_trait]
impl RestTransport for MockTransport {
    async fn get_json(&self, path: &str, query: Query<'_>) -> BackendResult<Value> {
        match self.reply(path, query).await? {
            Reply::Json(value) => Ok(value),
            Reply::Text(text) => serde_json::from_str(&text)
                .map_err(|e| BackendError::Decode(format!("{}: {}", path, e))),
            Reply::Error(err) => Err(err),
        }
    }

    async fn get_text(&self, path: &str, query: Query<'_>) -> BackendResult<String> {
        match self.reply(path, query).await? {
            Reply::Json(value) => Ok(value.to_string()),
            Reply::Text(text) => Ok(text),
            Reply::Error(err) => Err(err),
        }
    }
}
