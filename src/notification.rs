use crate::error::{ReceiverError, Result};
use crate::protocol::Notification;
use crate::types::{DeviceEndpoint, Domain, PowerState};
use serde_json::Value;

const SOUND_FIELD_TARGET: &str = "soundField";

/// A domain value reported by the device, before reconciliation
///
/// Volume reports may carry only one of level and mute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedChange {
    Power(PowerState),
    Volume { level: Option<u32>, muted: Option<bool> },
    Input(String),
    SoundField(String),
}

impl ReportedChange {
    pub fn domain(&self) -> Domain {
        match self {
            ReportedChange::Power(_) => Domain::Power,
            ReportedChange::Volume { .. } => Domain::Volume,
            ReportedChange::Input(_) => Domain::Input,
            ReportedChange::SoundField(_) => Domain::SoundField,
        }
    }
}

/// Translate a pushed notification into the changes it reports for our zone
///
/// Methods the core does not track yield no changes. Known methods with an
/// unusable payload are parse errors.
pub fn parse_notification(
    notification: &Notification,
    endpoint: &DeviceEndpoint,
) -> Result<Vec<ReportedChange>> {
    let entries = payload_entries(&notification.params);

    match notification.method.as_str() {
        "notifyPowerStatus" => {
            // Zone power arrives as terminal status instead
            if endpoint.is_zoned() {
                return Ok(Vec::new());
            }
            let entry = entries.first().ok_or_else(|| {
                ReceiverError::Parse("notifyPowerStatus without payload".to_string())
            })?;
            Ok(vec![ReportedChange::Power(power_from_status(entry)?)])
        }
        "notifyExternalTerminalStatus" => {
            let mut changes = Vec::new();
            for entry in entries {
                let uri = entry.get("uri").and_then(Value::as_str);
                let is_ours = match uri {
                    Some(uri) if endpoint.is_zoned() => uri == endpoint.zone(),
                    Some(uri) => uri == "extOutput:zone?zone=1",
                    None => false,
                };
                if is_ours {
                    changes.push(ReportedChange::Power(power_from_active(entry)?));
                }
            }
            Ok(changes)
        }
        "notifyVolumeInformation" => {
            let mut changes = Vec::new();
            for entry in entries.into_iter().filter(|e| endpoint.matches_output(output_of(e))) {
                let (level, muted) = volume_fields(entry)?;
                changes.push(ReportedChange::Volume { level, muted });
            }
            Ok(changes)
        }
        "notifyPlayingContentInfo" => {
            let mut changes = Vec::new();
            for entry in entries.into_iter().filter(|e| endpoint.matches_output(output_of(e))) {
                let uri = entry
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ReceiverError::Parse("notifyPlayingContentInfo without uri".to_string())
                    })?;
                changes.push(ReportedChange::Input(uri.to_string()));
            }
            Ok(changes)
        }
        "notifySettingsUpdate" => Ok(sound_field_from_entries(&entries)
            .map(|value| vec![ReportedChange::SoundField(value)])
            .unwrap_or_default()),
        other => {
            tracing::debug!("Ignoring untracked notification {}", other);
            Ok(Vec::new())
        }
    }
}

/// Flatten the device's parameter layout into a list of objects.
/// Payloads come both as `[{..}]` and as `[[{..}, {..}]]`.
pub(crate) fn payload_entries(params: &[Value]) -> Vec<&Value> {
    let mut entries = Vec::new();
    for param in params {
        match param {
            Value::Array(items) => entries.extend(items.iter().filter(|item| item.is_object())),
            Value::Object(_) => entries.push(param),
            _ => {}
        }
    }
    entries
}

pub(crate) fn output_of(entry: &Value) -> Option<&str> {
    entry.get("output").and_then(Value::as_str)
}

pub(crate) fn power_from_status(entry: &Value) -> Result<PowerState> {
    let status = entry
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ReceiverError::Parse("power payload without status".to_string()))?;
    PowerState::from_status(status)
        .ok_or_else(|| ReceiverError::Parse(format!("unknown power status {}", status)))
}

pub(crate) fn power_from_active(entry: &Value) -> Result<PowerState> {
    let active = entry
        .get("active")
        .and_then(Value::as_str)
        .ok_or_else(|| ReceiverError::Parse("terminal payload without active flag".to_string()))?;
    PowerState::from_status(active)
        .ok_or_else(|| ReceiverError::Parse(format!("unknown terminal state {}", active)))
}

/// Extract level and mute from a volume entry. At least one must be present.
pub(crate) fn volume_fields(entry: &Value) -> Result<(Option<u32>, Option<bool>)> {
    let level = match entry.get("volume") {
        None => None,
        Some(Value::Number(n)) => n.as_u64().map(|v| v.min(u64::from(u32::MAX)) as u32),
        Some(Value::String(s)) => s.parse::<u32>().ok(),
        Some(_) => None,
    };

    let muted = match entry.get("mute") {
        Some(Value::String(s)) if s == "on" => Some(true),
        Some(Value::String(s)) if s == "off" => Some(false),
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    };

    if level.is_none() && muted.is_none() {
        return Err(ReceiverError::Parse(format!(
            "volume payload without volume or mute: {}",
            entry
        )));
    }

    Ok((level, muted))
}

pub(crate) fn sound_field_from_entries(entries: &[&Value]) -> Option<String> {
    entries
        .iter()
        .filter(|entry| entry.get("target").and_then(Value::as_str) == Some(SOUND_FIELD_TARGET))
        .find_map(|entry| entry.get("currentValue").and_then(Value::as_str))
        .map(str::to_string)
}
