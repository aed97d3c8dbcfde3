use crate::types::{ControlValue, Domain, PowerState, VolumeState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
/// Every cached value here is last-value-wins, so poisoned data is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached control state of the receiver, one lock per domain
///
/// Clones share the same underlying state. Written by successful outbound
/// commands and by reconciled notifications.
#[derive(Clone, Default)]
pub struct ControlState {
    power: Arc<Mutex<PowerState>>,
    volume: Arc<Mutex<VolumeState>>,
    input: Arc<Mutex<Option<String>>>,
    sound_field: Arc<Mutex<Option<String>>>,
}

/// Consistent copy of every cached domain
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub power: PowerState,
    pub volume: VolumeState,
    pub input: Option<String>,
    pub sound_field: Option<String>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn power(&self) -> PowerState {
        *lock(&self.power)
    }

    pub fn volume(&self) -> VolumeState {
        *lock(&self.volume)
    }

    pub fn input(&self) -> Option<String> {
        lock(&self.input).clone()
    }

    pub fn sound_field(&self) -> Option<String> {
        lock(&self.sound_field).clone()
    }

    pub(crate) fn set_power(&self, power: PowerState) {
        *lock(&self.power) = power;
    }

    pub(crate) fn set_volume_level(&self, level: u32) {
        lock(&self.volume).level = level;
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        lock(&self.volume).muted = muted;
    }

    pub(crate) fn set_input(&self, uri: impl Into<String>) {
        *lock(&self.input) = Some(uri.into());
    }

    pub(crate) fn set_sound_field(&self, value: impl Into<String>) {
        *lock(&self.sound_field) = Some(value.into());
    }

    /// Current value of a domain, `None` if it has never been learned
    pub fn get(&self, domain: Domain) -> Option<ControlValue> {
        match domain {
            Domain::Power => match self.power() {
                PowerState::Unknown => None,
                power => Some(ControlValue::Power(power)),
            },
            Domain::Volume => Some(ControlValue::Volume(self.volume())),
            Domain::Input => self.input().map(ControlValue::Input),
            Domain::SoundField => self.sound_field().map(ControlValue::SoundField),
        }
    }

    /// Store a value, returning whether it differs from what was cached
    pub(crate) fn apply(&self, value: &ControlValue) -> bool {
        match value {
            ControlValue::Power(power) => replace(&self.power, *power),
            ControlValue::Volume(volume) => replace(&self.volume, *volume),
            ControlValue::Input(uri) => replace(&self.input, Some(uri.clone())),
            ControlValue::SoundField(field) => replace(&self.sound_field, Some(field.clone())),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            power: self.power(),
            volume: self.volume(),
            input: self.input(),
            sound_field: self.sound_field(),
        }
    }
}

fn replace<T: PartialEq>(slot: &Mutex<T>, value: T) -> bool {
    let mut current = lock(slot);
    if *current == value {
        false
    } else {
        *current = value;
        true
    }
}
