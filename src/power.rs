use crate::error::{ReceiverError, Result};
use crate::notification::{payload_entries, power_from_active, power_from_status, ReportedChange};
use crate::reconcile::{Origin, Reconciler};
use crate::rpc::RpcClient;
use crate::types::{Domain, PowerState};
use serde_json::{json, Value};

/// Power control of the configured zone
///
/// The main zone is switched through the `system` service; secondary zones
/// are output terminals of the `avContent` service.
#[derive(Clone)]
pub struct PowerService {
    rpc: RpcClient,
    reconciler: Reconciler,
}

impl PowerService {
    pub(crate) fn new(rpc: RpcClient, reconciler: Reconciler) -> Self {
        Self { rpc, reconciler }
    }

    /// Last known power state without contacting the device
    pub fn cached(&self) -> PowerState {
        self.reconciler.state().power()
    }

    /// Query the device and reconcile the answer into the cache
    ///
    /// Returns the cached state afterwards, which is also the fallback when
    /// the query fails. An answer inside the debounce window of a local
    /// command is discarded like any other echo.
    pub async fn get_current_state(&self) -> PowerState {
        match fetch(&self.rpc).await {
            Ok(power) => {
                self.reconciler.apply(ReportedChange::Power(power), Origin::Poll);
                self.cached()
            }
            Err(e) => {
                tracing::warn!("Power query failed, using cached state: {}", e);
                self.cached()
            }
        }
    }

    /// Switch the zone on or off
    pub async fn set_state(&self, on: bool) -> Result<()> {
        let endpoint = self.rpc.endpoint();
        let result = if endpoint.is_zoned() {
            let active = if on { "active" } else { "inactive" };
            self.rpc
                .request(
                    "avContent",
                    "setActiveTerminal",
                    vec![json!({ "active": active, "uri": endpoint.zone() })],
                    "1.0",
                )
                .await
        } else {
            let status = if on { "active" } else { "off" };
            self.rpc
                .request(
                    "system",
                    "setPowerStatus",
                    vec![json!({ "status": status })],
                    "1.1",
                )
                .await
        };

        match result {
            Ok(_) => {
                self.reconciler.state().set_power(PowerState::from(on));
                self.reconciler.ledger().stamp(Domain::Power);
                tracing::info!("Power set to {}", if on { "on" } else { "off" });
                Ok(())
            }
            Err(e) => {
                tracing::error!("Setting power to {} failed: {}", on, e);
                Err(e)
            }
        }
    }
}

/// Query the power state of the configured zone
pub(crate) async fn fetch(rpc: &RpcClient) -> Result<PowerState> {
    let endpoint = rpc.endpoint();

    if endpoint.is_zoned() {
        let result = rpc
            .request("avContent", "getCurrentExternalTerminalsStatus", Vec::new(), "1.0")
            .await?;
        let terminal = payload_entries(&result)
            .into_iter()
            .find(|entry| entry.get("uri").and_then(Value::as_str) == Some(endpoint.zone()))
            .ok_or_else(|| {
                ReceiverError::Parse(format!(
                    "zone {} not among output terminals",
                    endpoint.zone()
                ))
            })?;
        power_from_active(terminal)
    } else {
        let status = rpc.request_first("system", "getPowerStatus", Vec::new(), "1.1").await?;
        power_from_status(&status)
    }
}
