//! Transport seam
//!
//! A transport performs one blocking POST-and-wait exchange. The
//! dispatcher never has more than one exchange in flight.

pub mod http;
pub mod mock;

pub use http::HttpTransport;
pub use mock::{MockTransport, RecordedRequest};

use serde_json::Value as Json;

use crate::Result;

/// Raw HTTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking request/response primitive
///
/// Implementations return `Err` only when no HTTP status was obtained;
/// non-success statuses are returned as responses and judged by the caller.
pub trait Transport: Send + Sync {
    fn post(&self, url: &str, body: &Json) -> Result<TransportResponse>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Request URL for a command
pub fn command_url(host: &str, command: &str) -> String {
    format!("http://{}/{}", host, command)
}
