//! HTTP transport over a blocking `reqwest` client

use std::time::Duration;

use bridge_config::HttpSettings;
use serde_json::Value as Json;
use tracing::trace;

use super::{Transport, TransportResponse};
use crate::{BridgeError, Result};

/// Blocking JSON-over-HTTP transport with connection pooling
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let timeout = match settings.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let client = reqwest::blocking::Client::builder()
            .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_secs))
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| BridgeError::http_with_source("failed to build HTTP client", e))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &str, body: &Json) -> Result<TransportResponse> {
        trace!(url, %body, "POST");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| BridgeError::http_with_source(format!("POST {} failed", url), e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| BridgeError::http_with_source(format!("reading reply from {} failed", url), e))?;

        Ok(TransportResponse { status, body })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
