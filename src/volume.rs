use crate::error::{ReceiverError, Result};
use crate::notification::{output_of, payload_entries, volume_fields, ReportedChange};
use crate::reconcile::{Origin, Reconciler};
use crate::rpc::RpcClient;
use crate::types::{Domain, VolumeState};
use serde_json::json;

/// Volume level and mute control of the configured zone
///
/// Level and mute are independent: raising the level of a muted zone leaves
/// it muted until [`VolumeService::set_muted`] is called.
#[derive(Clone)]
pub struct VolumeService {
    rpc: RpcClient,
    reconciler: Reconciler,
    max_volume: u32,
}

impl VolumeService {
    pub(crate) fn new(rpc: RpcClient, reconciler: Reconciler, max_volume: u32) -> Self {
        Self {
            rpc,
            reconciler,
            max_volume,
        }
    }

    pub fn max_volume(&self) -> u32 {
        self.max_volume
    }

    pub fn cached(&self) -> VolumeState {
        self.reconciler.state().volume()
    }

    /// Query the device and reconcile the answer into the cache, falling
    /// back to the cached state if the query fails
    pub async fn get_current_state(&self) -> VolumeState {
        match fetch(&self.rpc).await {
            Ok((level, muted)) => {
                self.reconciler.apply(ReportedChange::Volume { level, muted }, Origin::Poll);
                self.cached()
            }
            Err(e) => {
                tracing::warn!("Volume query failed, using cached state: {}", e);
                self.cached()
            }
        }
    }

    /// Set the volume level, clamped to `0..=max_volume`
    ///
    /// Returns the level actually sent to the device.
    pub async fn set_state(&self, level: i64) -> Result<u32> {
        let level = self.clamp(level);
        let zone = self.rpc.endpoint().zone().to_string();

        let result = self
            .rpc
            .request(
                "audio",
                "setAudioVolume",
                vec![json!({ "volume": level.to_string(), "output": zone })],
                "1.1",
            )
            .await;

        match result {
            Ok(_) => {
                self.reconciler.state().set_volume_level(level);
                self.reconciler.ledger().stamp(Domain::Volume);
                tracing::info!("Volume set to {}", level);
                Ok(level)
            }
            Err(e) => {
                tracing::error!("Setting volume to {} failed: {}", level, e);
                Err(e)
            }
        }
    }

    /// Mute or unmute the zone
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        let zone = self.rpc.endpoint().zone().to_string();
        let mute = if muted { "on" } else { "off" };

        let result = self
            .rpc
            .request(
                "audio",
                "setAudioMute",
                vec![json!({ "mute": mute, "output": zone })],
                "1.1",
            )
            .await;

        match result {
            Ok(_) => {
                self.reconciler.state().set_muted(muted);
                self.reconciler.ledger().stamp(Domain::Volume);
                tracing::info!("Mute set to {}", muted);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Setting mute to {} failed: {}", muted, e);
                Err(e)
            }
        }
    }

    fn clamp(&self, level: i64) -> u32 {
        level.clamp(0, i64::from(self.max_volume)) as u32
    }
}

/// Query level and mute of the configured zone
pub(crate) async fn fetch(rpc: &RpcClient) -> Result<(Option<u32>, Option<bool>)> {
    let endpoint = rpc.endpoint();
    let result = rpc
        .request(
            "audio",
            "getVolumeInformation",
            vec![json!({ "output": endpoint.zone() })],
            "1.1",
        )
        .await?;

    let entries = payload_entries(&result);
    let entry = entries
        .iter()
        .find(|entry| endpoint.matches_output(output_of(entry)))
        .or_else(|| entries.first())
        .ok_or_else(|| ReceiverError::Parse("empty volume information".to_string()))?;

    volume_fields(entry)
}
