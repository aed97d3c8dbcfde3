use crate::error::{ReceiverError, Result};
use crate::notification::{payload_entries, sound_field_from_entries, ReportedChange};
use crate::reconcile::{Origin, Reconciler};
use crate::rpc::RpcClient;
use crate::types::{Domain, SoundFieldEntry};
use serde_json::json;
use std::sync::Arc;

/// Sound field selection, restricted to configured sound fields
#[derive(Clone)]
pub struct SoundFieldSelector {
    rpc: RpcClient,
    reconciler: Reconciler,
    fields: Arc<Vec<SoundFieldEntry>>,
}

impl SoundFieldSelector {
    pub(crate) fn new(
        rpc: RpcClient,
        reconciler: Reconciler,
        fields: Vec<SoundFieldEntry>,
    ) -> Self {
        Self {
            rpc,
            reconciler,
            fields: Arc::new(fields),
        }
    }

    pub fn sound_fields(&self) -> &[SoundFieldEntry] {
        &self.fields
    }

    pub fn cached(&self) -> Option<String> {
        self.reconciler.state().sound_field()
    }

    /// Query the active sound field and reconcile it into the cache, falling
    /// back to the cached one if the query fails
    pub async fn get_current_state(&self) -> Option<String> {
        match fetch(&self.rpc).await {
            Ok(value) => {
                self.reconciler.apply(ReportedChange::SoundField(value), Origin::Poll);
                self.cached()
            }
            Err(e) => {
                tracing::warn!("Sound field query failed, using cached state: {}", e);
                self.cached()
            }
        }
    }

    /// Activate a configured sound field
    pub async fn set_state(&self, value: &str) -> Result<()> {
        let entry = self
            .fields
            .iter()
            .find(|entry| entry.value == value)
            .ok_or_else(|| {
                ReceiverError::InvalidArgument(format!("sound field {} is not configured", value))
            })?;

        let result = self
            .rpc
            .request(
                "audio",
                "setSoundSettings",
                vec![json!({ "settings": [{ "value": value, "target": "soundField" }] })],
                "1.1",
            )
            .await;

        match result {
            Ok(_) => {
                self.reconciler.state().set_sound_field(value);
                self.reconciler.ledger().stamp(Domain::SoundField);
                tracing::info!("Sound field set to {} ({})", entry.name, value);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Setting sound field {} failed: {}", entry.name, e);
                Err(e)
            }
        }
    }
}

/// One configured sound field, exposed as an on/off switch
#[derive(Clone)]
pub struct SoundFieldService {
    selector: SoundFieldSelector,
    entry: SoundFieldEntry,
}

impl SoundFieldService {
    pub(crate) fn new(selector: SoundFieldSelector, entry: SoundFieldEntry) -> Self {
        Self { selector, entry }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn value(&self) -> &str {
        &self.entry.value
    }

    pub fn is_active(&self) -> bool {
        self.selector.cached().as_deref() == Some(self.entry.value.as_str())
    }

    pub async fn get_current_state(&self) -> bool {
        self.selector.get_current_state().await.as_deref() == Some(self.entry.value.as_str())
    }

    /// Turning the switch on activates this sound field; off does nothing,
    /// one sound field is always active.
    pub async fn set_state(&self, on: bool) -> Result<()> {
        if on {
            self.selector.set_state(&self.entry.value).await
        } else {
            tracing::debug!("Ignoring request to deselect sound field {}", self.entry.name);
            Ok(())
        }
    }
}

/// Query the active sound field
pub(crate) async fn fetch(rpc: &RpcClient) -> Result<String> {
    let result = rpc
        .request(
            "audio",
            "getSoundSettings",
            vec![json!({ "target": "soundField" })],
            "1.1",
        )
        .await?;

    sound_field_from_entries(&payload_entries(&result))
        .ok_or_else(|| ReceiverError::Parse("sound field missing from sound settings".to_string()))
}
