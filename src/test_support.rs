//! In-memory doubles for the outbound seams, shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::models::PersistedRecord;
use crate::db::{RecordStore, WriteError};
use crate::graph::transport::{GraphTransport, TransportError, TransportResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

/// Replays queued responses in order: form POSTs and GETs have separate queues.
/// An exhausted queue answers 599 so an unexpected extra call is visible.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    posts: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    gets: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_post(&self, status: u16, body: impl Into<String>) {
        lock(&self.posts).push_back(Ok(TransportResponse {
            status,
            body: body.into(),
        }));
    }

    pub fn push_get(&self, status: u16, body: impl Into<String>) {
        lock(&self.gets).push_back(Ok(TransportResponse {
            status,
            body: body.into(),
        }));
    }

    pub fn push_get_error(&self, error: TransportError) {
        lock(&self.gets).push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn get_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == Method::Get)
            .collect()
    }

    fn record(&self, call: RecordedCall) {
        lock(&self.calls).push(call);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn exhausted() -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status: 599,
        body: "no scripted response".to_string(),
    })
}

#[async_trait]
impl GraphTransport for ScriptedTransport {
    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<TransportResponse, TransportError> {
        self.record(RecordedCall {
            method: Method::Post,
            url: url.to_string(),
            bearer: None,
            headers: Vec::new(),
            form: form
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        });
        lock(&self.posts).pop_front().unwrap_or_else(exhausted)
    }

    async fn get(
        &self,
        url: &str,
        bearer: &str,
        headers: &[(&str, &str)],
    ) -> Result<TransportResponse, TransportError> {
        self.record(RecordedCall {
            method: Method::Get,
            url: url.to_string(),
            bearer: Some(bearer.to_string()),
            headers: headers
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            form: Vec::new(),
        });
        lock(&self.gets).pop_front().unwrap_or_else(exhausted)
    }
}

/// Store double that remembers every batch it was handed, empty ones included.
#[derive(Debug, Default)]
pub struct RecordingStore {
    batches: Mutex<Vec<Vec<PersistedRecord>>>,
    write_calls: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Vec<PersistedRecord>> {
        lock(&self.batches).clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn write_batch(&self, records: Vec<PersistedRecord>) -> Result<usize, WriteError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let inserted = records.len();
        lock(&self.batches).push(records);
        Ok(inserted)
    }
}

/// A Graph message JSON object with the fields the pipeline reads.
pub fn graph_message(id: &str, received_at: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "receivedDateTime": received_at,
        "subject": format!("Coverage {id}"),
        "from": { "emailAddress": { "name": "Clippings Desk", "address": "clips@example.com" } },
        "body": { "contentType": "html", "content": format!("<p>{id}</p>") }
    })
}

/// A Graph page body with the given items and optional `@odata.nextLink`.
pub fn graph_page(items: Vec<serde_json::Value>, next_link: Option<&str>) -> String {
    let mut page = serde_json::json!({ "value": items });
    if let Some(next) = next_link {
        page["@odata.nextLink"] = serde_json::Value::String(next.to_string());
    }
    page.to_string()
}
