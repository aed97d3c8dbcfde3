use serde::{Deserialize, Serialize};
use std::fmt;

/// Output zone URI, e.g. `extOutput:zone?zone=2`. Empty means the main zone.
pub type OutputZone = String;

/// Network location of a receiver and the zone commands target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    host: String,
    port: u16,
    zone: OutputZone,
    notification_port: u16,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16, zone: impl Into<OutputZone>) -> Self {
        Self {
            host: host.into(),
            port,
            zone: zone.into(),
            notification_port: port,
        }
    }

    /// Use a different port for the notification websocket than for RPC calls
    pub fn with_notification_port(mut self, port: u16) -> Self {
        self.notification_port = port;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Whether commands target a secondary zone rather than the main output
    pub fn is_zoned(&self) -> bool {
        !self.zone.is_empty()
    }

    /// URL of an RPC service, e.g. `http://host:10000/sony/audio`
    pub fn rpc_url(&self, service: &str) -> String {
        format!("http://{}:{}/sony/{}", self.host, self.port, service)
    }

    /// URL of the notification socket for an event source
    pub fn notification_url(&self, source: EventSource) -> String {
        format!(
            "ws://{}:{}/sony/{}",
            self.host,
            self.notification_port,
            source.service_name()
        )
    }

    /// Whether a payload tagged with `output` concerns our zone.
    /// Payloads without an output tag always match.
    pub fn matches_output(&self, output: Option<&str>) -> bool {
        match output {
            None => true,
            Some(output) if output.is_empty() => true,
            Some(output) => output == self.zone || (!self.is_zoned() && is_main_zone(output)),
        }
    }
}

fn is_main_zone(output: &str) -> bool {
    output == "extOutput:zone?zone=1"
}

/// A control domain the core keeps cached state for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Domain {
    Power,
    Volume,
    Input,
    SoundField,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Power, Domain::Volume, Domain::Input, Domain::SoundField];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Power => "power",
            Domain::Volume => "volume",
            Domain::Input => "input",
            Domain::SoundField => "soundField",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device library that pushes notifications over its own websocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventSource {
    Audio,
    AvContent,
    System,
}

impl EventSource {
    pub fn service_name(&self) -> &'static str {
        match self {
            EventSource::Audio => "audio",
            EventSource::AvContent => "avContent",
            EventSource::System => "system",
        }
    }

    /// Domains whose state this source reports, and which are polled when
    /// the push subscription is unavailable
    pub fn domains(&self) -> &'static [Domain] {
        match self {
            EventSource::Audio => &[Domain::Volume, Domain::SoundField],
            EventSource::AvContent => &[Domain::Input, Domain::Power],
            EventSource::System => &[Domain::Power],
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Power state of the controlled zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerState {
    /// Not yet learned from the device
    #[default]
    Unknown,
    On,
    Off,
}

impl PowerState {
    /// Parse a device power status (`active`, `standby`, `off`, `inactive`)
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "active" => Some(PowerState::On),
            "standby" | "off" | "inactive" => Some(PowerState::Off),
            _ => None,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On)
    }
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on {
            PowerState::On
        } else {
            PowerState::Off
        }
    }
}

/// Volume level and mute flag. The two are independent on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeState {
    pub level: u32,
    pub muted: bool,
}

/// A value of one control domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlValue {
    Power(PowerState),
    Volume(VolumeState),
    /// Active input URI
    Input(String),
    /// Active sound field value
    SoundField(String),
}

impl ControlValue {
    pub fn domain(&self) -> Domain {
        match self {
            ControlValue::Power(_) => Domain::Power,
            ControlValue::Volume(_) => Domain::Volume,
            ControlValue::Input(_) => Domain::Input,
            ControlValue::SoundField(_) => Domain::SoundField,
        }
    }
}

/// Configured input source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEntry {
    pub name: String,
    /// Input URI, e.g. `extInput:hdmi?port=1`
    pub uri: String,
}

/// Configured sound field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundFieldEntry {
    pub name: String,
    /// Sound field value, e.g. `dolbySurround`
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_device_layout() {
        let endpoint = DeviceEndpoint::new("192.168.1.20", 10000, "");
        assert_eq!(endpoint.rpc_url("audio"), "http://192.168.1.20:10000/sony/audio");
        assert_eq!(
            endpoint.notification_url(EventSource::AvContent),
            "ws://192.168.1.20:10000/sony/avContent"
        );

        let endpoint = endpoint.with_notification_port(10001);
        assert_eq!(
            endpoint.notification_url(EventSource::Audio),
            "ws://192.168.1.20:10001/sony/audio"
        );
        assert_eq!(endpoint.rpc_url("system"), "http://192.168.1.20:10000/sony/system");
    }

    #[test]
    fn zone_matching() {
        let main = DeviceEndpoint::new("host", 10000, "");
        assert!(main.matches_output(None));
        assert!(main.matches_output(Some("")));
        assert!(main.matches_output(Some("extOutput:zone?zone=1")));
        assert!(!main.matches_output(Some("extOutput:zone?zone=2")));

        let zone2 = DeviceEndpoint::new("host", 10000, "extOutput:zone?zone=2");
        assert!(zone2.is_zoned());
        assert!(zone2.matches_output(Some("extOutput:zone?zone=2")));
        assert!(!zone2.matches_output(Some("extOutput:zone?zone=1")));
    }

    #[test]
    fn power_status_parsing() {
        assert_eq!(PowerState::from_status("active"), Some(PowerState::On));
        assert_eq!(PowerState::from_status("standby"), Some(PowerState::Off));
        assert_eq!(PowerState::from_status("inactive"), Some(PowerState::Off));
        assert_eq!(PowerState::from_status("warming"), None);
        assert_eq!(PowerState::default(), PowerState::Unknown);
    }
}
