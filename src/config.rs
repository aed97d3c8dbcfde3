use crate::error::{ReceiverError, Result};
use crate::types::{DeviceEndpoint, EventSource, InputEntry, SoundFieldEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_MAX_VOLUME: u32 = 100;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 10_000;
const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 2_000;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Receiver configuration, as found in the accessory platform's JSON config
///
/// Only `ip` is required; everything else has a default.
///
/// ```
/// use sony_audio_control::ReceiverConfig;
///
/// let config = ReceiverConfig::from_json(r#"{
///     "ip": "192.168.1.20",
///     "outputZone": "extOutput:zone?zone=2",
///     "inputs": [{ "name": "TV", "uri": "extInput:hdmi?port=1" }]
/// }"#).unwrap();
///
/// assert_eq!(config.port, 10000);
/// assert_eq!(config.sound_fields.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverConfig {
    /// Accessory name, used in log lines only
    #[serde(default)]
    pub name: String,

    /// Receiver host name or IP address
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Port of the notification websocket when it differs from `port`
    #[serde(default)]
    pub notification_port: Option<u16>,

    /// Output zone URI; empty targets the main zone
    #[serde(default)]
    pub output_zone: String,

    #[serde(default)]
    pub inputs: Vec<InputEntry>,

    #[serde(default = "default_sound_fields")]
    pub sound_fields: Vec<SoundFieldEntry>,

    #[serde(default = "default_max_volume")]
    pub max_volume: u32,

    /// Keep the network interface up in standby (`quickStartMode`)
    #[serde(default = "default_true")]
    pub enable_network_standby: bool,

    /// Event sources to subscribe to
    #[serde(default = "default_event_sources")]
    pub event_sources: Vec<EventSource>,

    /// Milliseconds between state queries while push is unavailable
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,

    /// Milliseconds after a local change during which pushes for the same
    /// domain are treated as echoes
    #[serde(default = "default_debounce_window")]
    pub debounce_window: u64,

    /// Consecutive failed connects before falling back to polling
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,

    /// HTTP request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// Timing knobs of the notification listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub polling_interval: Duration,
    pub reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl ReceiverConfig {
    /// Configuration with all defaults for the receiver at `ip`
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            ip: ip.into(),
            port: DEFAULT_PORT,
            notification_port: None,
            output_zone: String::new(),
            inputs: Vec::new(),
            sound_fields: default_sound_fields(),
            max_volume: DEFAULT_MAX_VOLUME,
            enable_network_standby: true,
            event_sources: default_event_sources(),
            polling_interval: DEFAULT_POLLING_INTERVAL_MS,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW_MS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff: DEFAULT_MAX_BACKOFF_MS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    /// Parse and validate a JSON configuration block
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ip.trim().is_empty() {
            return Err(ReceiverError::InvalidArgument("receiver ip must not be empty".to_string()));
        }

        let mut uris = HashSet::new();
        for input in &self.inputs {
            if !uris.insert(input.uri.as_str()) {
                return Err(ReceiverError::InvalidArgument(format!(
                    "input uri {} configured more than once",
                    input.uri
                )));
            }
        }

        let mut values = HashSet::new();
        for field in &self.sound_fields {
            if !values.insert(field.value.as_str()) {
                return Err(ReceiverError::InvalidArgument(format!(
                    "sound field {} configured more than once",
                    field.value
                )));
            }
        }

        if self.polling_interval == 0 {
            return Err(ReceiverError::InvalidArgument(
                "pollingInterval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn endpoint(&self) -> DeviceEndpoint {
        let endpoint = DeviceEndpoint::new(self.ip.clone(), self.port, self.output_zone.clone());
        match self.notification_port {
            Some(port) => endpoint.with_notification_port(port),
            None => endpoint,
        }
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        let initial_backoff = Duration::from_millis(self.initial_backoff);
        ListenerSettings {
            polling_interval: Duration::from_millis(self.polling_interval),
            reconnect_attempts: self.reconnect_attempts,
            initial_backoff,
            max_backoff: Duration::from_millis(self.max_backoff).max(initial_backoff),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_volume() -> u32 {
    DEFAULT_MAX_VOLUME
}

fn default_true() -> bool {
    true
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_debounce_window() -> u64 {
    DEFAULT_DEBOUNCE_WINDOW_MS
}

fn default_reconnect_attempts() -> u32 {
    DEFAULT_RECONNECT_ATTEMPTS
}

fn default_initial_backoff() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_event_sources() -> Vec<EventSource> {
    vec![EventSource::Audio, EventSource::AvContent]
}

fn default_sound_fields() -> Vec<SoundFieldEntry> {
    vec![
        SoundFieldEntry {
            name: "Surround Mode".to_string(),
            value: "dolbySurround".to_string(),
        },
        SoundFieldEntry {
            name: "Stereo Mode".to_string(),
            value: "2chStereo".to_string(),
        },
    ]
}
