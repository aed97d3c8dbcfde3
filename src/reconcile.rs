use crate::events::{ChangeEvent, ObserverRegistry};
use crate::ledger::ChangeLedger;
use crate::notification::ReportedChange;
use crate::state::{lock, ControlState};
use crate::types::{ControlValue, Domain, VolumeState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Where a reported change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Push,
    Poll,
}

/// Applies device-reported changes to the cached state
///
/// A change is dropped when it lands inside the debounce window of a local
/// command for the same domain, or when it matches the cached value.
/// Everything else updates the cache and is emitted to observers.
#[derive(Clone)]
pub struct Reconciler {
    state: ControlState,
    ledger: ChangeLedger,
    observers: ObserverRegistry,
    // apply + emit for one domain happens under its gate, keeping per-domain order
    gates: Arc<HashMap<Domain, Mutex<()>>>,
}

impl Reconciler {
    pub fn new(state: ControlState, ledger: ChangeLedger, observers: ObserverRegistry) -> Self {
        let gates = Domain::ALL.iter().map(|domain| (*domain, Mutex::new(()))).collect();
        Self {
            state,
            ledger,
            observers,
            gates: Arc::new(gates),
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Reconcile one change, returning the emitted event if any
    pub fn apply(&self, change: ReportedChange, origin: Origin) -> Option<ChangeEvent> {
        let domain = change.domain();

        if self.ledger.is_echo(domain) {
            tracing::debug!(
                "Discarding {:?} {} change inside debounce window: {:?}",
                origin,
                domain,
                change
            );
            return None;
        }

        let _gate = self.gates.get(&domain).map(lock);

        let value = self.resolve(change);
        if !self.state.apply(&value) {
            tracing::trace!("{} unchanged: {:?}", domain, value);
            return None;
        }

        tracing::info!("{} changed ({:?}): {:?}", domain, origin, value);
        let event = ChangeEvent::new(value);
        self.observers.emit(event.clone());
        Some(event)
    }

    /// Fill in the parts of a partial report from the cache
    fn resolve(&self, change: ReportedChange) -> ControlValue {
        match change {
            ReportedChange::Power(power) => ControlValue::Power(power),
            ReportedChange::Volume { level, muted } => {
                let cached = self.state.volume();
                ControlValue::Volume(VolumeState {
                    level: level.unwrap_or(cached.level),
                    muted: muted.unwrap_or(cached.muted),
                })
            }
            ReportedChange::Input(uri) => ControlValue::Input(uri),
            ReportedChange::SoundField(value) => ControlValue::SoundField(value),
        }
    }
}
