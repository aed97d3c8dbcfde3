use crate::error::{ReceiverError, Result};
use crate::notification::{output_of, payload_entries, ReportedChange};
use crate::reconcile::{Origin, Reconciler};
use crate::rpc::RpcClient;
use crate::types::{Domain, InputEntry};
use serde_json::{json, Value};
use std::sync::Arc;

/// Input selection of the configured zone, restricted to configured inputs
#[derive(Clone)]
pub struct InputSelector {
    rpc: RpcClient,
    reconciler: Reconciler,
    inputs: Arc<Vec<InputEntry>>,
}

impl InputSelector {
    pub(crate) fn new(rpc: RpcClient, reconciler: Reconciler, inputs: Vec<InputEntry>) -> Self {
        Self {
            rpc,
            reconciler,
            inputs: Arc::new(inputs),
        }
    }

    pub fn inputs(&self) -> &[InputEntry] {
        &self.inputs
    }

    /// URI of the last known active input
    pub fn cached(&self) -> Option<String> {
        self.reconciler.state().input()
    }

    /// Query the active input and reconcile it into the cache, falling back
    /// to the cached one if the query fails
    pub async fn get_current_state(&self) -> Option<String> {
        match fetch(&self.rpc).await {
            Ok(uri) => {
                self.reconciler.apply(ReportedChange::Input(uri), Origin::Poll);
                self.cached()
            }
            Err(e) => {
                tracing::warn!("Input query failed, using cached state: {}", e);
                self.cached()
            }
        }
    }

    /// Switch to the input with the given URI, which must be configured
    pub async fn set_state(&self, uri: &str) -> Result<()> {
        let entry = self
            .inputs
            .iter()
            .find(|entry| entry.uri == uri)
            .ok_or_else(|| {
                ReceiverError::InvalidArgument(format!("input {} is not configured", uri))
            })?;

        let zone = self.rpc.endpoint().zone().to_string();
        let result = self
            .rpc
            .request(
                "avContent",
                "setPlayContent",
                vec![json!({ "output": zone, "uri": uri })],
                "1.2",
            )
            .await;

        match result {
            Ok(_) => {
                self.reconciler.state().set_input(uri);
                self.reconciler.ledger().stamp(Domain::Input);
                tracing::info!("Input switched to {} ({})", entry.name, uri);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Switching input to {} failed: {}", entry.name, e);
                Err(e)
            }
        }
    }
}

/// One configured input, exposed as an on/off switch
#[derive(Clone)]
pub struct InputService {
    selector: InputSelector,
    entry: InputEntry,
}

impl InputService {
    pub(crate) fn new(selector: InputSelector, entry: InputEntry) -> Self {
        Self { selector, entry }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn uri(&self) -> &str {
        &self.entry.uri
    }

    /// Whether this input is the cached active input
    pub fn is_active(&self) -> bool {
        self.selector.cached().as_deref() == Some(self.entry.uri.as_str())
    }

    /// Query the device and report whether this input is active
    pub async fn get_current_state(&self) -> bool {
        self.selector.get_current_state().await.as_deref() == Some(self.entry.uri.as_str())
    }

    /// Turning the switch on selects this input. The device has no notion of
    /// deselecting an input, so turning it off does nothing.
    pub async fn set_state(&self, on: bool) -> Result<()> {
        if on {
            self.selector.set_state(&self.entry.uri).await
        } else {
            tracing::debug!("Ignoring request to deselect input {}", self.entry.name);
            Ok(())
        }
    }
}

/// Query the URI playing on the configured zone
pub(crate) async fn fetch(rpc: &RpcClient) -> Result<String> {
    let endpoint = rpc.endpoint();
    let result = rpc
        .request(
            "avContent",
            "getPlayingContentInfo",
            vec![json!({ "output": endpoint.zone() })],
            "1.2",
        )
        .await?;

    let entries = payload_entries(&result);
    entries
        .iter()
        .filter(|entry| endpoint.matches_output(output_of(entry)))
        .find_map(|entry| entry.get("uri").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| ReceiverError::Parse("no playing content for zone".to_string()))
}
