use crate::error::{ReceiverError, Result};
use crate::state::lock;
use crate::types::{ControlValue, Domain};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::broadcast;

/// A reconciled state change of one domain
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub domain: Domain,
    pub value: ControlValue,
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    pub fn new(value: ControlValue) -> Self {
        Self {
            domain: value.domain(),
            value,
            timestamp: SystemTime::now(),
        }
    }
}

/// Handle returned by [`ObserverRegistry::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Registry of change observers
///
/// Handlers are called synchronously, in registration order, on the task that
/// reconciled the change. Every event is also broadcast to [`ChangeReceiver`]s.
#[derive(Clone)]
pub struct ObserverRegistry {
    handlers: Arc<Mutex<Vec<(ObserverId, Domain, Handler)>>>,
    next_id: Arc<AtomicU64>,
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(100);
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            broadcast_tx,
        }
    }

    /// Call `handler` for every reconciled change of `domain`
    pub fn on_change<F>(&self, domain: Domain, handler: F) -> ObserverId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers).push((id, domain, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut handlers = lock(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(handler_id, _, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Receive every change event, for consumers that prefer a queue to callbacks
    pub fn subscribe(&self) -> ChangeReceiver {
        ChangeReceiver::new(self.broadcast_tx.subscribe())
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        // Snapshot so handlers may register or remove observers themselves
        let matching: Vec<Handler> = lock(&self.handlers)
            .iter()
            .filter(|(_, domain, _)| *domain == event.domain)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in matching {
            handler(&event);
        }

        let _ = self.broadcast_tx.send(event);
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for change events
pub struct ChangeReceiver {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next change event
    pub async fn recv(&mut self) -> Result<ChangeEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => ReceiverError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                ReceiverError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a change event without blocking
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(ReceiverError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(ReceiverError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
