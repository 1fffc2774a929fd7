//! Server responses
//!
//! Every reply is one of three outcomes: a terminal result, a terminal
//! error, or a request to run a local callback before the original call
//! can complete.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::envelope::Envelope;
use crate::registry::CallbackHandle;
use crate::{BridgeError, Result};

/// Leading `"<Word>: "` added by the remote runtime's error formatting
static ERROR_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z]+: ").expect("static error prefix pattern is valid")
});

/// Strip one leading `"<Word>: "` prefix, e.g. `"Error: boom"` -> `"boom"`
pub fn strip_error_prefix(message: &str) -> &str {
    match ERROR_PREFIX.find(message) {
        Some(prefix) => &message[prefix.end()..],
        None => message,
    }
}

/// `error` field: a plain string or a structured (dict) envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Text(String),
    Structured(Envelope),
}

/// Raw response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Option<Envelope>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub callback: Option<CallbackHandle>,
    #[serde(default)]
    pub this: Option<Envelope>,
    #[serde(default)]
    pub arguments: Option<Envelope>,
    #[serde(default)]
    pub callback_call_counter: Option<u64>,
}

/// The remote wants a local callback run
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackRequest {
    pub callback: CallbackHandle,
    pub this: Envelope,
    pub arguments: Envelope,
    /// Echoed back so the remote can match replies across poll cycles
    pub call_counter: Option<u64>,
}

/// Error reported by the remote, not yet decoded
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    pub error: ErrorPayload,
    pub message: Option<String>,
}

/// Classified response
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Envelope),
    Error(RemoteFailure),
    Callback(CallbackRequest),
}

impl Response {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| BridgeError::protocol_with_source(format!("invalid response body: {}", body), e))
    }

    /// Whether the server asked for a callback
    pub fn carries_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Error takes precedence over a callback request, which takes
    /// precedence over a result. A reply with none of them is an empty
    /// (undefined) result.
    pub fn into_outcome(self) -> Outcome {
        if let Some(error) = self.error {
            return Outcome::Error(RemoteFailure {
                error,
                message: self.message,
            });
        }

        if let Some(callback) = self.callback {
            return Outcome::Callback(CallbackRequest {
                callback,
                this: self.this.unwrap_or_else(Envelope::undefined),
                arguments: self.arguments.unwrap_or_else(|| Envelope::list(Vec::new())),
                call_counter: self.callback_call_counter,
            });
        }

        Outcome::Result(self.result.unwrap_or_default())
    }
}
