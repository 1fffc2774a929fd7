//! Scripted in-memory transport
//!
//! Responses are served in the order they were queued. Every request is
//! recorded so tests can assert on the exact command sequence and payloads.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as Json;

use super::{Transport, TransportResponse};
use crate::{BridgeError, Result};

/// A request the mock received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub command: String,
    pub body: Json,
}

#[derive(Default)]
struct MockState {
    responses: VecDeque<TransportResponse>,
    fallback: Option<TransportResponse>,
    requests: Vec<RecordedRequest>,
}

/// Transport double for tests; clones share state
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a 200 response with the given JSON body
    pub fn push_json(&self, body: Json) -> &Self {
        self.push_response(TransportResponse::ok(body.to_string()))
    }

    /// Queue a response with an arbitrary status and raw body
    pub fn push_status(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push_response(TransportResponse {
            status,
            body: body.into(),
        })
    }

    pub fn push_response(&self, response: TransportResponse) -> &Self {
        self.state.lock().responses.push_back(response);
        self
    }

    /// Response served whenever the queue is empty
    pub fn set_fallback(&self, body: Json) {
        self.state.lock().fallback = Some(TransportResponse::ok(body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().responses.len()
    }
}

impl Transport for MockTransport {
    fn post(&self, url: &str, body: &Json) -> Result<TransportResponse> {
        let mut state = self.state.lock();

        let command = url.rsplit('/').next().unwrap_or_default().to_string();
        state.requests.push(RecordedRequest {
            url: url.to_string(),
            command: command.clone(),
            body: body.clone(),
        });

        match state.responses.pop_front() {
            Some(response) => Ok(response),
            None => state
                .fallback
                .clone()
                .ok_or_else(|| BridgeError::http(format!("no scripted response for {}", command))),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serves_in_order_and_records() {
        let mock = MockTransport::new();
        mock.push_json(json!({"result": {"value": 1}}))
            .push_status(500, "down");

        let first = mock.post("http://h/get_property", &json!({"id": 1})).unwrap();
        let second = mock.post("http://h/call_method", &json!({})).unwrap();

        assert_eq!(first.body, r#"{"result":{"value":1}}"#);
        assert_eq!(second.status, 500);
        assert_eq!(mock.commands(), vec!["get_property", "call_method"]);
        assert_eq!(mock.requests()[0].body, json!({"id": 1}));
    }

    #[test]
    fn test_exhausted_queue() {
        let mock = MockTransport::new();
        assert!(mock.post("http://h/x", &json!({})).is_err());

        mock.set_fallback(json!({}));
        assert_eq!(mock.post("http://h/x", &json!({})).unwrap().body, "{}");
        assert_eq!(mock.pending(), 0);
    }
}
