//! Ion chamber detector channels.
//!
//! An ion chamber measures X-ray flux as a small current, amplified by a
//! [`PreAmplifier`] into a voltage that a voltage-to-frequency converter turns
//! into pulses counted on one channel of a shared [`Scaler`]. This module ties
//! those three pieces together: triggering delegates to the scaler (joining
//! any acquisition already in flight), gain changes step the pre-amplifier's
//! sensitivity level, and the derived readings convert raw channel counts back
//! into volts and amps.
//!
//! Derived readings are fail-safe: with no acquisition yet (zero clock ticks),
//! a zero clock frequency, or an unconfigured volts-to-counts factor, they
//! report 0 rather than dividing by zero.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{BeamlineError, BeamlineResult};
use crate::preamp::PreAmplifier;
use crate::registry::Component;
use crate::scaler::Scaler;
use crate::signal::Signal;
use crate::status::Status;

/// Default registry labels for ion chambers.
fn default_labels() -> BTreeSet<String> {
    BTreeSet::from(["ion_chambers".to_string(), "detectors".to_string()])
}

/// One detector channel: a scaler channel plus its pre-amplifier.
pub struct IonChamber {
    name: String,
    labels: BTreeSet<String>,
    scaler: Arc<Scaler>,
    channel: usize,
    /// The current pre-amplifier feeding this channel.
    pub preamp: Arc<PreAmplifier>,
    /// Voltage-to-frequency conversion factor, in counts per volt-second.
    pub counts_per_volt_second: Signal<f64>,
    /// Dark current subtracted from [`IonChamber::amps`], in A.
    pub offset_current: Signal<f64>,
}

impl IonChamber {
    /// Create an ion chamber reading `channel` of a shared scaler.
    ///
    /// # Errors
    ///
    /// [`BeamlineError::Instrument`] when `channel` is 0 (reserved for the
    /// scaler clock) or beyond the scaler's channel count.
    pub fn new(
        name: impl Into<String>,
        scaler: Arc<Scaler>,
        channel: usize,
        preamp: Arc<PreAmplifier>,
        counts_per_volt_second: f64,
    ) -> BeamlineResult<Self> {
        let name = name.into();
        if channel == 0 {
            return Err(BeamlineError::Instrument(format!(
                "Ion chamber '{name}': channel 0 is reserved for the scaler clock"
            )));
        }
        if channel >= scaler.num_channels() {
            return Err(BeamlineError::Instrument(format!(
                "Ion chamber '{name}': channel {channel} outside scaler '{}' ({} channels)",
                scaler.prefix(),
                scaler.num_channels()
            )));
        }
        Ok(Self {
            name,
            labels: default_labels(),
            scaler,
            channel,
            preamp,
            counts_per_volt_second: Signal::new("counts_per_volt_second", counts_per_volt_second)
                .with_units("counts/(V s)"),
            offset_current: Signal::new("offset_current", 0.0).with_units("A"),
        })
    }

    /// Replace the default labels.
    pub fn with_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels = labels.into_iter().collect();
        self
    }

    /// The scaler channel index this detector counts on.
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// The shared scaler this detector counts on.
    pub fn scaler(&self) -> &Arc<Scaler> {
        &self.scaler
    }

    /// Trigger an acquisition on the shared scaler.
    ///
    /// If the scaler is already counting, this joins the in-flight acquisition
    /// and returns its status handle; the hardware is not restarted.
    pub fn trigger(&self) -> Status {
        self.scaler.trigger()
    }

    /// Step the pre-amplifier sensitivity by `step` gain levels.
    ///
    /// A resulting [`BeamlineError::GainOverflow`] is reported against this
    /// ion chamber's name, since that is the device the operator addressed.
    pub fn change_sensitivity(&self, step: i64) -> BeamlineResult<Status> {
        let target = self.preamp.gain_level() + step;
        self.preamp.set_gain_level(target).map_err(|err| match err {
            BeamlineError::GainOverflow {
                requested,
                gain_min,
                gain_max,
                ..
            } => BeamlineError::GainOverflow {
                device: self.name.clone(),
                requested,
                gain_min,
                gain_max,
            },
            other => other,
        })
    }

    /// Increase the gain (more sensitive) by one level.
    pub fn increase_gain(&self) -> BeamlineResult<Status> {
        self.change_sensitivity(1)
    }

    /// Decrease the gain (less sensitive) by one level.
    pub fn decrease_gain(&self) -> BeamlineResult<Status> {
        self.change_sensitivity(-1)
    }

    fn raw_counts(&self) -> f64 {
        match self.scaler.channel(self.channel) {
            Some(channel) => channel.raw_count.get() as f64,
            None => 0.0,
        }
    }

    /// Actual acquisition time in seconds, recovered from the clock channel.
    ///
    /// Zero before the first acquisition or with a zero clock frequency.
    pub fn acquisition_time(&self) -> f64 {
        let ticks = match self.scaler.channel(0) {
            Some(clock) => clock.raw_count.get() as f64,
            None => 0.0,
        };
        let frequency = self.scaler.clock_frequency.get();
        if ticks == 0.0 || frequency == 0.0 {
            return 0.0;
        }
        ticks / frequency
    }

    /// Pre-amplifier output voltage averaged over the last acquisition.
    ///
    /// `(counts / counts_per_volt_second) / acquisition_time`, or 0 when any
    /// factor is unavailable.
    pub fn volts(&self) -> f64 {
        let counts_per_volt_second = self.counts_per_volt_second.get();
        let seconds = self.acquisition_time();
        if counts_per_volt_second == 0.0 || seconds == 0.0 {
            return 0.0;
        }
        (self.raw_counts() / counts_per_volt_second) / seconds
    }

    /// Detector current in amps, corrected for the configured dark current.
    pub fn amps(&self) -> f64 {
        let gain = self.preamp.gain();
        if !gain.is_finite() || gain == 0.0 {
            return 0.0;
        }
        self.volts() / gain - self.offset_current.get()
    }

    /// Raw count rate over the last acquisition, in counts/s.
    pub fn count_rate(&self) -> f64 {
        let seconds = self.acquisition_time();
        if seconds == 0.0 {
            return 0.0;
        }
        self.raw_counts() / seconds
    }

    /// Counts corrected for the channel's background rate.
    pub fn net_counts(&self) -> f64 {
        let offset_rate = match self.scaler.channel(self.channel) {
            Some(channel) => channel.offset_rate.get(),
            None => 0.0,
        };
        self.raw_counts() - offset_rate * self.acquisition_time()
    }
}

impl std::fmt::Debug for IonChamber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IonChamber")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("scaler", &self.scaler.prefix())
            .finish()
    }
}

impl Component for IonChamber {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    fn children(&self) -> Vec<Arc<dyn Component>> {
        vec![Arc::clone(&self.preamp) as Arc<dyn Component>]
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
