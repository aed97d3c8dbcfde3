use crate::config::ReceiverConfig;
use crate::error::Result;
use crate::events::{ChangeEvent, ChangeReceiver, ObserverId, ObserverRegistry};
use crate::input::{InputSelector, InputService};
use crate::ledger::ChangeLedger;
use crate::listener::{NotificationListener, SubscriptionStatus};
use crate::power::PowerService;
use crate::reconcile::Reconciler;
use crate::rpc::RpcClient;
use crate::sound_field::{SoundFieldSelector, SoundFieldService};
use crate::state::{ControlState, StateSnapshot};
use crate::types::{Domain, EventSource};
use crate::volume::VolumeService;
use serde_json::{json, Value};

/// Client for a Sony network AV receiver
///
/// Owns the RPC client, the cached control state, the last-change ledger and
/// the notification listener, and wires them into one service per control
/// domain. All services share the same state and ledger.
pub struct SonyReceiver {
    config: ReceiverConfig,
    rpc: RpcClient,
    state: ControlState,
    observers: ObserverRegistry,
    power: PowerService,
    volume: VolumeService,
    input_selector: InputSelector,
    inputs: Vec<InputService>,
    sound_field_selector: SoundFieldSelector,
    sound_fields: Vec<SoundFieldService>,
    listener: NotificationListener,
}

impl SonyReceiver {
    /// Build every component from a configuration. Nothing is sent to the
    /// device until [`start`](Self::start).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sony_audio_control::{ReceiverConfig, SonyReceiver};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let mut receiver = SonyReceiver::new(ReceiverConfig::new("192.168.1.20"))?;
    ///     receiver.start().await;
    ///     receiver.volume().set_state(30).await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;

        let rpc = RpcClient::new(config.endpoint(), config.request_timeout())?;
        let state = ControlState::new();
        let observers = ObserverRegistry::new();
        let ledger = ChangeLedger::new(config.debounce_window());
        // Queries, pushes and polls all reach the cache through this reconciler
        let reconciler = Reconciler::new(state.clone(), ledger, observers.clone());

        let power = PowerService::new(rpc.clone(), reconciler.clone());
        let volume = VolumeService::new(rpc.clone(), reconciler.clone(), config.max_volume);

        let input_selector =
            InputSelector::new(rpc.clone(), reconciler.clone(), config.inputs.clone());
        let inputs = config
            .inputs
            .iter()
            .map(|entry| InputService::new(input_selector.clone(), entry.clone()))
            .collect();

        let sound_field_selector =
            SoundFieldSelector::new(rpc.clone(), reconciler.clone(), config.sound_fields.clone());
        let sound_fields = config
            .sound_fields
            .iter()
            .map(|entry| SoundFieldService::new(sound_field_selector.clone(), entry.clone()))
            .collect();

        let listener = NotificationListener::new(
            rpc.clone(),
            reconciler,
            &config.event_sources,
            config.listener_settings(),
        );

        Ok(Self {
            config,
            rpc,
            state,
            observers,
            power,
            volume,
            input_selector,
            inputs,
            sound_field_selector,
            sound_fields,
            listener,
        })
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Apply the network standby preference, then start the notification
    /// listener. Startup RPC failures are logged and do not prevent the
    /// listener from starting.
    pub async fn start(&mut self) {
        self.apply_network_standby().await;
        self.listener.start().await;
    }

    /// Stop the notification listener
    pub async fn stop(&mut self) {
        self.listener.stop().await;
    }

    /// Send the configured network standby (`quickStartMode`) preference.
    /// Returns whether the device accepted it.
    pub async fn apply_network_standby(&self) -> bool {
        let value = if self.config.enable_network_standby { "on" } else { "off" };
        let params = vec![json!({
            "settings": [{ "target": "quickStartMode", "value": value }]
        })];

        match self.rpc.request("system", "setPowerSettings", params, "1.0").await {
            Ok(_) => {
                tracing::info!("Network standby is currently {}", value);
                true
            }
            Err(e) => {
                tracing::error!("Setting network standby failed: {}", e);
                false
            }
        }
    }

    /// Model name reported by the device, e.g. `STR-DN1080`
    pub async fn model_name(&self) -> Option<String> {
        match self
            .rpc
            .request_first("system", "getInterfaceInformation", Vec::new(), "1.0")
            .await
        {
            Ok(info) => {
                let model = info.get("modelName").and_then(Value::as_str).map(str::to_string);
                tracing::debug!("Model name is {:?}", model);
                model
            }
            Err(e) => {
                tracing::error!("Querying interface information failed: {}", e);
                None
            }
        }
    }

    pub fn power(&self) -> &PowerService {
        &self.power
    }

    pub fn volume(&self) -> &VolumeService {
        &self.volume
    }

    /// Domain-level input selection
    pub fn input_selector(&self) -> &InputSelector {
        &self.input_selector
    }

    /// One switch per configured input
    pub fn inputs(&self) -> &[InputService] {
        &self.inputs
    }

    pub fn sound_field_selector(&self) -> &SoundFieldSelector {
        &self.sound_field_selector
    }

    /// One switch per configured sound field
    pub fn sound_fields(&self) -> &[SoundFieldService] {
        &self.sound_fields
    }

    pub fn listener(&self) -> &NotificationListener {
        &self.listener
    }

    pub fn subscription_status(&self, source: EventSource) -> Option<SubscriptionStatus> {
        self.listener.status(source)
    }

    /// Snapshot of every cached domain
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Call `handler` whenever a reconciled change of `domain` occurs
    pub fn on_change<F>(&self, domain: Domain, handler: F) -> ObserverId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.observers.on_change(domain, handler)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Receive every reconciled change event
    pub fn subscribe(&self) -> ChangeReceiver {
        self.observers.subscribe()
    }
}
