//! Multi-channel counting scaler and trigger coordination.
//!
//! A scaler is a shared resource: several ion chambers feed different channels
//! of the same counting hardware, and triggering it once acquires data for all
//! of them. The [`TriggerCoordinator`] makes that sharing safe. When a second
//! detector asks to trigger while an acquisition keyed by the same scaler
//! prefix is still in flight, it is handed the *same* [`Status`] instead of
//! restarting the hardware.
//!
//! The [`Scaler`] here is a simulator with the real device's interface: a
//! count gate, a preset time, a clock frequency, and per-channel raw counts.
//! Channel 0 always counts the clock itself, which gives downstream math a
//! known-good time base.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::registry::Component;
use crate::signal::Signal;
use crate::status::{Completer, Status};

/// Serializes trigger requests for shared counting hardware.
///
/// Acquisitions are keyed by scaler prefix. A trigger request either starts a
/// new acquisition or joins the live one for its key, receiving an
/// identity-equal status handle. Completed statuses are left in the map and
/// lazily replaced on the next trigger; nothing fires on completion.
#[derive(Debug, Default)]
pub struct TriggerCoordinator {
    statuses: Mutex<HashMap<String, Status>>,
}

impl TriggerCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the live acquisition for `key`, or start a new one via `start`.
    ///
    /// `start` is only invoked when there is no acquisition in flight for the
    /// key; it must kick off the hardware and return the status tracking it.
    pub fn trigger_or_join<F>(&self, key: &str, start: F) -> Status
    where
        F: FnOnce() -> Status,
    {
        let mut statuses = self
            .statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(status) = statuses.get(key) {
            if !status.is_done() {
                log::debug!("Joining in-flight acquisition for '{key}'");
                return status.clone();
            }
        }
        log::debug!("Starting new acquisition for '{key}'");
        let status = start();
        statuses.insert(key.to_string(), status.clone());
        status
    }

    /// Whether an acquisition for `key` is currently in flight.
    pub fn is_counting(&self, key: &str) -> bool {
        let statuses = self
            .statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        statuses.get(key).is_some_and(|status| !status.is_done())
    }
}

/// One input channel of a scaler.
#[derive(Debug)]
pub struct ScalerChannel {
    /// Accumulated counts from the last acquisition.
    pub raw_count: Signal<u64>,
    /// Background count rate subtracted for net readings, in counts/s.
    pub offset_rate: Signal<f64>,
    /// Human-readable channel description.
    pub description: Signal<String>,
}

impl ScalerChannel {
    fn new(index: usize) -> Self {
        Self {
            raw_count: Signal::new(format!("channel{index}_raw_count"), 0),
            offset_rate: Signal::new(format!("channel{index}_offset_rate"), 0.0)
                .with_units("counts/s"),
            description: Signal::new(format!("channel{index}_description"), String::new()),
        }
    }
}

/// A multi-channel counting scaler.
///
/// Counting runs for `preset_time` seconds with the `count` gate raised, then
/// deposits results per channel. Channel 0 receives the clock tick count
/// (`preset_time * clock_frequency`), which readers use to recover the actual
/// acquisition time.
pub struct Scaler {
    name: String,
    labels: BTreeSet<String>,
    prefix: String,
    coordinator: Arc<TriggerCoordinator>,
    /// Count gate: true while an acquisition is in progress.
    pub count: Signal<bool>,
    /// Internal clock frequency in Hz.
    pub clock_frequency: Signal<f64>,
    /// Counting time per acquisition in seconds.
    pub preset_time: Signal<f64>,
    channels: Vec<ScalerChannel>,
}

impl Scaler {
    /// Create a scaler with `num_channels` inputs.
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        num_channels: usize,
        clock_frequency: f64,
        coordinator: Arc<TriggerCoordinator>,
    ) -> Self {
        Self {
            name: name.into(),
            labels: BTreeSet::from(["scalers".to_string()]),
            prefix: prefix.into(),
            coordinator,
            count: Signal::new("count", false),
            clock_frequency: Signal::new("clock_frequency", clock_frequency).with_units("Hz"),
            preset_time: Signal::new("preset_time", 1.0)
                .with_units("s")
                .with_range(0.0, f64::MAX),
            channels: (0..num_channels).map(ScalerChannel::new).collect(),
        }
    }

    /// The hardware record prefix, also the trigger-coordination key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of input channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Access a channel by index.
    pub fn channel(&self, index: usize) -> Option<&ScalerChannel> {
        self.channels.get(index)
    }

    /// Trigger an acquisition, or join one already in flight.
    ///
    /// All callers triggering while the scaler is counting receive the same
    /// status handle ([`Status::same`] returns true); the hardware is started
    /// at most once per acquisition.
    pub fn trigger(self: &Arc<Self>) -> Status {
        let scaler = Arc::clone(self);
        self.coordinator
            .trigger_or_join(&self.prefix, move || scaler.start_count())
    }

    /// Whether an acquisition for this scaler is in flight.
    pub fn is_counting(&self) -> bool {
        self.coordinator.is_counting(&self.prefix)
    }

    fn start_count(self: Arc<Self>) -> Status {
        let (status, completer) = Status::pending();
        tokio::spawn(self.run_acquisition(completer));
        status
    }

    /// Simulated acquisition: raise the gate, count for the preset time,
    /// deposit clock ticks into channel 0, drop the gate.
    async fn run_acquisition(self: Arc<Self>, completer: Completer) {
        self.count.set_unchecked(true);
        let preset = self.preset_time.get();
        tokio::time::sleep(Duration::from_secs_f64(preset)).await;
        let ticks = (preset * self.clock_frequency.get()).round() as u64;
        if let Some(clock_channel) = self.channels.first() {
            clock_channel.raw_count.set_unchecked(ticks);
        }
        self.count.set_unchecked(false);
        completer.complete();
    }
}

impl std::fmt::Debug for Scaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scaler")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("num_channels", &self.channels.len())
            .finish()
    }
}

impl Component for Scaler {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
