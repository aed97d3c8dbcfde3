use crate::error::{ReceiverError, Result};
use crate::protocol::{Request, Response};
use crate::types::DeviceEndpoint;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// JSON-RPC client for the receiver's HTTP control surface
///
/// Every call is a single `POST /sony/{service}`. There is no retry at this
/// layer. Clones share the underlying connection pool and request-id counter.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: Arc<DeviceEndpoint>,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// Create a client for the given endpoint with a per-request timeout
    pub fn new(endpoint: DeviceEndpoint, timeout: Duration) -> Result<Self> {
        // Receivers live on the local network, never behind a proxy
        let http = reqwest::Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(Self {
            http,
            endpoint: Arc::new(endpoint),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Call `method` of `service` and return the `result` list
    pub async fn request(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        version: &str,
    ) -> Result<Vec<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(method, params, version, id);
        let url = self.endpoint.rpc_url(service);

        tracing::debug!("Sending {} {}.{} v{}", url, service, method, version);

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!("Received ({}): {}", status, body);

        if !status.is_success() {
            // The device sometimes explains itself even on an error status
            if let Ok(parsed) = serde_json::from_str::<Response>(&body) {
                if parsed.has_error() {
                    return parsed.into_result();
                }
            }
            return Err(ReceiverError::device(
                i64::from(status.as_u16()),
                status.canonical_reason().unwrap_or("HTTP error"),
            ));
        }

        let parsed: Response = serde_json::from_str(&body)
            .map_err(|e| ReceiverError::Parse(format!("invalid response to {}: {}", method, e)))?;

        parsed.into_result()
    }

    /// Call `method` and return the first element of the `result` list
    pub async fn request_first(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        version: &str,
    ) -> Result<Value> {
        self.request(service, method, params, version)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ReceiverError::Parse(format!("empty result from {}", method)))
    }
}
