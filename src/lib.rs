//! Rust library for controlling Sony network AV receivers
//!
//! This library exposes the control surface of Sony receivers speaking the
//! Audio Control API (STR-DN1080 and relatives) and keeps a local copy of
//! their state in sync with device-initiated changes. It supports:
//!
//! - Power, volume and mute control, zone-aware
//! - Input selection and sound field selection among configured entries
//! - Push notifications over the device's notification websockets
//! - Polling fallback when push is unavailable, with automatic recovery
//! - Echo suppression for notifications caused by our own commands
//! - Change observers (callbacks or a broadcast receiver)
//!
//! # Quick Start
//!
//! ```no_run
//! use sony_audio_control::{Domain, ReceiverConfig, SonyReceiver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReceiverConfig::from_json(r#"{
//!         "ip": "192.168.1.20",
//!         "inputs": [
//!             { "name": "TV", "uri": "extInput:hdmi?port=1" },
//!             { "name": "Turntable", "uri": "extInput:line" }
//!         ]
//!     }"#)?;
//!
//!     let mut receiver = SonyReceiver::new(config)?;
//!     receiver.on_change(Domain::Power, |event| println!("power: {:?}", event.value));
//!     receiver.start().await;
//!
//!     receiver.power().set_state(true).await?;
//!     receiver.input_selector().set_state("extInput:hdmi?port=1").await?;
//!     receiver.volume().set_state(35).await?;
//!
//!     // Subscribe to state updates
//!     let mut updates = receiver.subscribe();
//!     while let Ok(update) = updates.recv().await {
//!         println!("State update: {:?}", update);
//!     }
//!
//!     receiver.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **RPC**: versioned JSON requests over `POST /sony/{service}`
//! - **Services**: power, volume, input and sound field control over a shared
//!   cached state and last-change ledger
//! - **Listener**: one notification socket per event source with polling fallback
//! - **Reconciler**: echo suppression, deduplication and observer dispatch
//! - **Protocol**: JSON message structures

mod client;
mod config;
mod connection;
mod error;
mod events;
mod input;
mod ledger;
mod listener;
mod notification;
mod power;
mod protocol;
mod reconcile;
mod rpc;
mod sound_field;
mod state;
mod types;
mod volume;

// Public exports
pub use client::SonyReceiver;
pub use config::{ListenerSettings, ReceiverConfig};
pub use connection::NotificationConnection;
pub use error::{ReceiverError, Result};
pub use events::{ChangeEvent, ChangeReceiver, ObserverId, ObserverRegistry};
pub use input::{InputSelector, InputService};
pub use ledger::ChangeLedger;
pub use listener::{NotificationListener, SubscriptionStatus};
pub use notification::{parse_notification, ReportedChange};
pub use power::PowerService;
pub use protocol::{Frame, Notification, Request, Response};
pub use reconcile::{Origin, Reconciler};
pub use rpc::RpcClient;
pub use sound_field::{SoundFieldSelector, SoundFieldService};
pub use state::{ControlState, StateSnapshot};
pub use types::{
    ControlValue, DeviceEndpoint, Domain, EventSource, InputEntry, OutputZone, PowerState,
    SoundFieldEntry, VolumeState,
};
