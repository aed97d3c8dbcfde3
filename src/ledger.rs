use crate::state::lock;
use crate::types::Domain;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Records when each domain was last changed by a local command
///
/// Pushes that arrive for a domain within `window` of such a change are the
/// device echoing our own command back and must not be re-applied. One ledger
/// is created per receiver and handed to every service and the listener.
#[derive(Clone, Debug)]
pub struct ChangeLedger {
    last_changes: Arc<Mutex<HashMap<Domain, Instant>>>,
    window: Duration,
}

impl ChangeLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            last_changes: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a local change of `domain` now
    pub fn stamp(&self, domain: Domain) {
        self.stamp_at(domain, Instant::now());
    }

    pub fn stamp_at(&self, domain: Domain, at: Instant) {
        lock(&self.last_changes).insert(domain, at);
    }

    pub fn last_change(&self, domain: Domain) -> Option<Instant> {
        lock(&self.last_changes).get(&domain).copied()
    }

    /// Whether a push for `domain` arriving now is an echo of a local change
    pub fn is_echo(&self, domain: Domain) -> bool {
        self.is_echo_at(domain, Instant::now())
    }

    pub fn is_echo_at(&self, domain: Domain, now: Instant) -> bool {
        match self.last_change(domain) {
            Some(changed) => now.saturating_duration_since(changed) < self.window,
            None => false,
        }
    }
}
