use crate::config::ListenerSettings;
use crate::connection::NotificationConnection;
use crate::error::{ReceiverError, Result};
use crate::notification::{parse_notification, ReportedChange};
use crate::protocol::Notification;
use crate::reconcile::{Origin, Reconciler};
use crate::rpc::RpcClient;
use crate::types::{Domain, EventSource};
use crate::{input, power, sound_field, volume};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Observable state of one event-source subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// No socket; a connect attempt is pending or in progress
    Disconnected,
    /// Push notifications are flowing
    Live,
    /// Push is unavailable; the domains of the source are queried periodically
    Polling,
}

/// Keeps the cached state in sync with device-initiated changes
///
/// One background task per event source keeps a notification socket open.
/// When the socket cannot be (re)established after the configured number of
/// attempts, or the device does not offer push for the source, the task polls
/// the source's domains instead and keeps probing for push with bounded
/// exponential backoff.
///
/// ```no_run
/// use sony_audio_control::{ReceiverConfig, SonyReceiver, Domain};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut receiver = SonyReceiver::new(ReceiverConfig::new("192.168.1.20"))?;
///     receiver.on_change(Domain::Volume, |event| println!("volume: {:?}", event.value));
///     receiver.start().await;
///
///     tokio::signal::ctrl_c().await?;
///     receiver.stop().await;
///     Ok(())
/// }
/// ```
pub struct NotificationListener {
    rpc: RpcClient,
    reconciler: Reconciler,
    settings: ListenerSettings,
    statuses: BTreeMap<EventSource, Arc<watch::Sender<SubscriptionStatus>>>,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handles: Vec<JoinHandle<()>>,
}

impl NotificationListener {
    pub fn new(
        rpc: RpcClient,
        reconciler: Reconciler,
        sources: &[EventSource],
        settings: ListenerSettings,
    ) -> Self {
        let statuses = sources
            .iter()
            .map(|source| {
                let (tx, _) = watch::channel(SubscriptionStatus::Disconnected);
                (*source, Arc::new(tx))
            })
            .collect();

        Self {
            rpc,
            reconciler,
            settings,
            statuses,
            stop_tx: None,
            task_handles: Vec::new(),
        }
    }

    pub fn sources(&self) -> Vec<EventSource> {
        self.statuses.keys().copied().collect()
    }

    /// Current status of a source's subscription, `None` for unconfigured sources
    pub fn status(&self, source: EventSource) -> Option<SubscriptionStatus> {
        self.statuses.get(&source).map(|tx| *tx.borrow())
    }

    /// Watch status transitions of a source's subscription
    pub fn watch_status(&self, source: EventSource) -> Option<watch::Receiver<SubscriptionStatus>> {
        self.statuses.get(&source).map(|tx| tx.subscribe())
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Start one subscription task per event source
    ///
    /// If the listener is already running, it is stopped and restarted.
    pub async fn start(&mut self) {
        self.stop().await;

        let (stop_tx, _) = broadcast::channel(1);

        for (source, status_tx) in &self.statuses {
            let subscription = Subscription {
                source: *source,
                rpc: self.rpc.clone(),
                reconciler: self.reconciler.clone(),
                settings: self.settings.clone(),
                status_tx: status_tx.clone(),
            };
            let stop_rx = stop_tx.subscribe();
            self.task_handles.push(tokio::spawn(subscription.run(stop_rx)));
        }

        tracing::info!("Notification listener started for {} source(s)", self.statuses.len());
        self.stop_tx = Some(stop_tx);
    }

    /// Stop every subscription, closing sockets and polling timers
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        for handle in self.task_handles.drain(..) {
            let abort = handle.abort_handle();
            // Give it a moment to stop gracefully
            if timeout(STOP_TIMEOUT, handle).await.is_err() {
                abort.abort();
            }
        }

        for status_tx in self.statuses.values() {
            status_tx.send_replace(SubscriptionStatus::Disconnected);
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        for handle in &self.task_handles {
            handle.abort();
        }
    }
}

enum Phase {
    Connecting {
        failures: u32,
        backoff: Duration,
    },
    Live {
        connection: NotificationConnection,
        notifications: mpsc::UnboundedReceiver<Notification>,
    },
    Polling {
        probe_backoff: Duration,
        next_probe: Instant,
    },
}

/// Subscription task of a single event source
struct Subscription {
    source: EventSource,
    rpc: RpcClient,
    reconciler: Reconciler,
    settings: ListenerSettings,
    status_tx: Arc<watch::Sender<SubscriptionStatus>>,
}

impl Subscription {
    async fn run(self, mut stop_rx: broadcast::Receiver<()>) {
        let mut phase = Phase::Connecting {
            failures: 0,
            backoff: self.settings.initial_backoff,
        };

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    tracing::info!("{} subscription stopped", self.source);
                    break;
                }
                next = self.step(phase) => {
                    phase = next;
                }
            }
        }
    }

    async fn step(&self, phase: Phase) -> Phase {
        match phase {
            Phase::Connecting { failures, backoff } => self.connect(failures, backoff).await,
            Phase::Live {
                connection,
                notifications,
            } => self.live(connection, notifications).await,
            Phase::Polling {
                probe_backoff,
                next_probe,
            } => self.poll(probe_backoff, next_probe).await,
        }
    }

    async fn open(
        &self,
    ) -> Result<(NotificationConnection, mpsc::UnboundedReceiver<Notification>)> {
        let url = self.rpc.endpoint().notification_url(self.source);
        let (connection, notifications) = NotificationConnection::connect(&url).await?;
        let enabled = connection.enable_notifications().await?;
        tracing::info!("{} subscription live with {} notification(s)", self.source, enabled);
        Ok((connection, notifications))
    }

    async fn connect(&self, failures: u32, backoff: Duration) -> Phase {
        match self.open().await {
            Ok((connection, notifications)) => self.go_live(connection, notifications).await,
            Err(ReceiverError::PushUnsupported(reason)) => {
                tracing::warn!("{} push unsupported ({}), polling instead", self.source, reason);
                self.enter_polling()
            }
            Err(e) => {
                let failures = failures + 1;
                if failures >= self.settings.reconnect_attempts {
                    tracing::warn!(
                        "{} connect failed {} time(s) ({}), polling every {:?}",
                        self.source,
                        failures,
                        e,
                        self.settings.polling_interval
                    );
                    self.enter_polling()
                } else {
                    tracing::debug!(
                        "{} connect failed ({}), retrying in {:?}",
                        self.source,
                        e,
                        backoff
                    );
                    sleep(backoff).await;
                    Phase::Connecting {
                        failures,
                        backoff: self.next_backoff(backoff),
                    }
                }
            }
        }
    }

    async fn go_live(
        &self,
        connection: NotificationConnection,
        notifications: mpsc::UnboundedReceiver<Notification>,
    ) -> Phase {
        self.set_status(SubscriptionStatus::Live);
        // Changes made while we were not subscribed are never pushed
        self.poll_once().await;
        Phase::Live {
            connection,
            notifications,
        }
    }

    async fn live(
        &self,
        connection: NotificationConnection,
        mut notifications: mpsc::UnboundedReceiver<Notification>,
    ) -> Phase {
        while let Some(notification) = notifications.recv().await {
            self.handle_notification(&notification);
        }

        tracing::warn!("{} subscription dropped, reconnecting", self.source);
        connection.close().await;
        self.set_status(SubscriptionStatus::Disconnected);

        Phase::Connecting {
            failures: 0,
            backoff: self.settings.initial_backoff,
        }
    }

    fn enter_polling(&self) -> Phase {
        self.set_status(SubscriptionStatus::Polling);
        let probe_backoff = self.settings.initial_backoff;
        Phase::Polling {
            probe_backoff,
            next_probe: Instant::now() + probe_backoff,
        }
    }

    async fn poll(&self, probe_backoff: Duration, next_probe: Instant) -> Phase {
        self.poll_once().await;
        sleep(self.settings.polling_interval).await;

        if Instant::now() < next_probe {
            return Phase::Polling {
                probe_backoff,
                next_probe,
            };
        }

        match self.open().await {
            Ok((connection, notifications)) => {
                tracing::info!("{} push restored", self.source);
                self.go_live(connection, notifications).await
            }
            Err(e) => {
                let probe_backoff = self.next_backoff(probe_backoff);
                tracing::debug!(
                    "{} push still unavailable ({}), next probe in {:?}",
                    self.source,
                    e,
                    probe_backoff
                );
                Phase::Polling {
                    probe_backoff,
                    next_probe: Instant::now() + probe_backoff,
                }
            }
        }
    }

    /// Query every domain of this source once and reconcile the results
    async fn poll_once(&self) {
        for domain in self.source.domains() {
            match fetch_domain(&self.rpc, *domain).await {
                Ok(change) => {
                    self.reconciler.apply(change, Origin::Poll);
                }
                Err(e) => tracing::debug!("Polling {} failed: {}", domain, e),
            }
        }
    }

    fn handle_notification(&self, notification: &Notification) {
        match parse_notification(notification, self.rpc.endpoint()) {
            Ok(changes) => {
                for change in changes {
                    self.reconciler.apply(change, Origin::Push);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Dropping {} notification {}: {}",
                    self.source,
                    notification.method,
                    e
                );
            }
        }
    }

    fn next_backoff(&self, backoff: Duration) -> Duration {
        (backoff * 2).min(self.settings.max_backoff)
    }

    fn set_status(&self, status: SubscriptionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!("{} subscription {:?} -> {:?}", self.source, previous, status);
        }
    }
}

async fn fetch_domain(rpc: &RpcClient, domain: Domain) -> Result<ReportedChange> {
    match domain {
        Domain::Power => power::fetch(rpc).await.map(ReportedChange::Power),
        Domain::Volume => volume::fetch(rpc)
            .await
            .map(|(level, muted)| ReportedChange::Volume { level, muted }),
        Domain::Input => input::fetch(rpc).await.map(ReportedChange::Input),
        Domain::SoundField => sound_field::fetch(rpc).await.map(ReportedChange::SoundField),
    }
}
