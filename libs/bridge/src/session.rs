//! Session identity
//!
//! A session binds the client to one host and an opaque id issued by
//! `create_session`. It lives as long as the dispatcher holding it.

use std::fmt;

use serde_json::Value as Json;

use crate::value::Value;
use crate::{BridgeError, Result};

/// Opaque session token; echoed back on every request in its original JSON form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(Json);

impl SessionId {
    /// Accept the decoded `create_session` result
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(_) | Value::Number(_) => Ok(Self(value.to_json())),
            other => Err(BridgeError::protocol(format!(
                "create_session returned a non-scalar session id: {:?}",
                other
            ))),
        }
    }

    pub fn as_json(&self) -> &Json {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Json::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Host plus (once established) session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    host: String,
    id: Option<SessionId>,
}

impl Session {
    /// Host known, session not yet established
    pub fn unestablished(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            id: None,
        }
    }

    pub fn established(host: impl Into<String>, id: SessionId) -> Self {
        Self {
            host: host.into(),
            id: Some(id),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn is_established(&self) -> bool {
        self.id.is_some()
    }
}
