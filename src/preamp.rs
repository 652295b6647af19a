//! SRS-570-style current pre-amplifier with discrete gain steps.
//!
//! The amplifier's sensitivity is set through two index-valued signals, a
//! numeric value (`1, 2, 5, … 500`) and a unit (`pA/V … mA/V`), mirroring the
//! multi-bit records the hardware exposes. This module layers a linear *gain
//! level* on top of them: `level = value_index + unit_index * 9`, walked up
//! and down one step at a time by the ion-chamber convenience methods.
//!
//! Level bounds and the offset-difference constant come from [`GainConfig`]
//! rather than being hard-coded. A level outside the allowed range fails with
//! `GainOverflow` before anything is written, so the previous gain remains in
//! effect.
//!
//! Gain changes are not ready to use immediately: the amplifier has an innate
//! RC relaxation after a sensitivity change, so writes carry a settle time
//! drawn from a table of measured values (long at the pA/V end, 0.5 s
//! elsewhere).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{BeamlineError, BeamlineResult};
use crate::registry::Component;
use crate::signal::Signal;
use crate::status::Status;

/// Discrete sensitivity values, in display form.
pub const SENSITIVITY_VALUES: [&str; 9] = ["1", "2", "5", "10", "20", "50", "100", "200", "500"];

/// Numeric counterparts of [`SENSITIVITY_VALUES`].
const SENSITIVITY_NUMBERS: [f64; 9] = [1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0];

/// Sensitivity units, in display form.
pub const SENSITIVITY_UNITS: [&str; 4] = ["pA/V", "nA/V", "uA/V", "mA/V"];

/// Offset units corresponding to [`SENSITIVITY_UNITS`].
pub const OFFSET_UNITS: [&str; 4] = ["pA", "nA", "uA", "mA"];

/// Amps per unit for each entry of [`SENSITIVITY_UNITS`].
const UNIT_SCALES: [f64; 4] = [1e-12, 1e-9, 1e-6, 1e-3];

/// Number of sensitivity values per unit decade group.
const VALUES_PER_UNIT: i64 = SENSITIVITY_VALUES.len() as i64;

/// Highest gain level the sensitivity tables can represent.
pub const MAX_GAIN_LEVEL: i64 =
    (SENSITIVITY_VALUES.len() * SENSITIVITY_UNITS.len() - 1) as i64;

/// Amplifier bandwidth/noise mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GainMode {
    /// Low-noise mode (slow settling at high sensitivity).
    LowNoise,
    /// High-bandwidth mode.
    HighBw,
    /// Low-drift mode (settles like low-noise).
    LowDrift,
}

/// Settling times measured on a 25-ID-C SR-570, keyed by
/// (value index, unit index, mode). Entries absent from the table settle in
/// the default 0.5 s.
static SETTLE_TIMES: Lazy<HashMap<(usize, usize, GainMode), Duration>> = Lazy::new(|| {
    let mut table = HashMap::new();
    let pa_high_bw = [2.5, 2.0, 2.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
    let pa_low_noise = [3.0, 2.5, 2.0, 2.0, 1.75, 1.5, 1.25, 0.5, 0.5];
    for (value_idx, secs) in pa_high_bw.iter().enumerate() {
        table.insert((value_idx, 0, GainMode::HighBw), Duration::from_secs_f64(*secs));
    }
    for (value_idx, secs) in pa_low_noise.iter().enumerate() {
        table.insert((value_idx, 0, GainMode::LowNoise), Duration::from_secs_f64(*secs));
    }
    table
});

const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Best settle time for a given sensitivity setting and mode.
pub fn settle_time(value_index: usize, unit_index: usize, mode: GainMode) -> Duration {
    // Low-drift mode uses the same settling times as low-noise mode.
    let mode = match mode {
        GainMode::LowDrift => GainMode::LowNoise,
        other => other,
    };
    SETTLE_TIMES
        .get(&(value_index, unit_index, mode))
        .copied()
        .unwrap_or(DEFAULT_SETTLE)
}

/// Gain-range configuration for a pre-amplifier.
///
/// The source hardware family disagrees on the exact level range, so the
/// bounds and the offset-level difference are parameters rather than
/// constants. Bounds wider than the sensitivity tables are clamped to the
/// representable `[0, MAX_GAIN_LEVEL]` at the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainConfig {
    /// Lowest allowed gain level.
    #[serde(default)]
    pub gain_min: i64,
    /// Highest allowed gain level.
    #[serde(default = "default_gain_max")]
    pub gain_max: i64,
    /// How many levels below the sensitivity the offset is set.
    #[serde(default = "default_offset_difference")]
    pub offset_difference: i64,
    /// Whether gain changes also write the offset value/unit pair.
    #[serde(default = "default_offset_enabled")]
    pub offset_enabled: bool,
}

fn default_gain_max() -> i64 {
    27
}

fn default_offset_difference() -> i64 {
    -3
}

fn default_offset_enabled() -> bool {
    true
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            gain_min: 0,
            gain_max: default_gain_max(),
            offset_difference: default_offset_difference(),
            offset_enabled: default_offset_enabled(),
        }
    }
}

/// A pre-amplifier with discrete, settable gain steps.
///
/// Signals mirror the hardware records: `sens_num`/`sens_unit` hold indices
/// into [`SENSITIVITY_VALUES`]/[`SENSITIVITY_UNITS`], and the offset pair
/// tracks a configured number of levels below the sensitivity to subtract a
/// small dark current automatically.
pub struct PreAmplifier {
    name: String,
    labels: BTreeSet<String>,
    config: GainConfig,
    /// Index into [`SENSITIVITY_VALUES`].
    pub sensitivity_value: Signal<usize>,
    /// Index into [`SENSITIVITY_UNITS`].
    pub sensitivity_unit: Signal<usize>,
    /// Index into [`SENSITIVITY_VALUES`] for the offset current.
    pub offset_value: Signal<usize>,
    /// Index into [`OFFSET_UNITS`].
    pub offset_unit: Signal<usize>,
    /// Whether the hardware offset is enabled.
    pub offset_on: Signal<bool>,
    /// Bandwidth/noise mode, which drives settle times.
    pub gain_mode: Signal<GainMode>,
}

impl PreAmplifier {
    /// Create a pre-amplifier with the given registry name and gain range.
    pub fn new(name: impl Into<String>, config: GainConfig) -> Self {
        let name = name.into();
        let max_value = SENSITIVITY_VALUES.len() - 1;
        let max_unit = SENSITIVITY_UNITS.len() - 1;
        Self {
            sensitivity_value: Signal::new("sens_num", 0).with_range(0, max_value),
            sensitivity_unit: Signal::new("sens_unit", 0).with_range(0, max_unit),
            offset_value: Signal::new("offset_num", 0).with_range(0, max_value),
            offset_unit: Signal::new("offset_unit", 0).with_range(0, max_unit),
            offset_on: Signal::new("offset_on", config.offset_enabled),
            gain_mode: Signal::new("gain_mode", GainMode::LowNoise),
            labels: BTreeSet::from(["preamps".to_string()]),
            config,
            name,
        }
    }

    /// The configured gain range and offset behavior.
    pub fn config(&self) -> &GainConfig {
        &self.config
    }

    /// Value index for a gain level.
    pub fn value_index(level: i64) -> usize {
        (level % VALUES_PER_UNIT) as usize
    }

    /// Unit index for a gain level.
    pub fn unit_index(level: i64) -> usize {
        (level / VALUES_PER_UNIT) as usize
    }

    /// Recompose a gain level from its value and unit indices.
    pub fn level_from_indices(value_index: usize, unit_index: usize) -> i64 {
        value_index as i64 + unit_index as i64 * VALUES_PER_UNIT
    }

    /// The current gain level, read back from the sensitivity signals.
    pub fn gain_level(&self) -> i64 {
        Self::level_from_indices(self.sensitivity_value.get(), self.sensitivity_unit.get())
    }

    /// Set the sensitivity to a target gain level.
    ///
    /// Decomposes the level into a value/unit pair and writes both, plus the
    /// offset pair at `level + offset_difference` (clamped at zero) when the
    /// offset is enabled. The returned status completes once every write has
    /// settled; the settle time comes from the measured table for the new
    /// setting.
    ///
    /// # Errors
    ///
    /// [`BeamlineError::GainOverflow`] when `level` is outside the configured
    /// range, which is clamped to the representable `[0, MAX_GAIN_LEVEL]` of
    /// the sensitivity tables. Nothing is written in that case; the previous
    /// sensitivity and offset remain in effect.
    pub fn set_gain_level(&self, level: i64) -> BeamlineResult<Status> {
        // Clamp to the tables so the decomposed indices are always valid and
        // the two signal writes cannot fail after the bounds check.
        let gain_min = self.config.gain_min.max(0);
        let gain_max = self.config.gain_max.min(MAX_GAIN_LEVEL);
        if level < gain_min || level > gain_max {
            log::warn!(
                "Rejected gain level {level} for '{}' (range {gain_min}..={gain_max})",
                self.name
            );
            return Err(BeamlineError::GainOverflow {
                device: self.name.clone(),
                requested: level,
                gain_min,
                gain_max,
            });
        }
        let value_idx = Self::value_index(level);
        let unit_idx = Self::unit_index(level);
        let settle = settle_time(value_idx, unit_idx, self.gain_mode.get());
        log::debug!(
            "Setting '{}' to level {level} ({} {}), settle {settle:?}",
            self.name,
            SENSITIVITY_VALUES[value_idx],
            SENSITIVITY_UNITS[unit_idx],
        );
        let mut statuses = vec![
            self.sensitivity_value.set_with_settle(value_idx, settle)?,
            self.sensitivity_unit.set_with_settle(unit_idx, settle)?,
        ];
        if self.config.offset_enabled {
            let offset_level = (level + self.config.offset_difference).max(0);
            statuses.push(self.offset_value.set(Self::value_index(offset_level))?);
            statuses.push(self.offset_unit.set(Self::unit_index(offset_level))?);
        }
        Ok(Status::all(statuses))
    }

    /// Amplifier gain in V/A for the current sensitivity setting.
    ///
    /// The sensitivity pair is an inverse gain in amps per volt; the gain is
    /// its reciprocal: `1 / (value * unit_scale)`.
    pub fn gain(&self) -> f64 {
        let value = SENSITIVITY_NUMBERS[self.sensitivity_value.get()];
        let scale = UNIT_SCALES[self.sensitivity_unit.get()];
        1.0 / (value * scale)
    }

    /// Amplifier gain in decibels (NaN when the gain is not positive).
    pub fn gain_db(&self) -> f64 {
        let gain = self.gain();
        if gain > 0.0 {
            10.0 * gain.log10()
        } else {
            f64::NAN
        }
    }

    /// The current sensitivity as a display pair, e.g. `("50", "nA/V")`.
    pub fn sensitivity(&self) -> (&'static str, &'static str) {
        (
            SENSITIVITY_VALUES[self.sensitivity_value.get()],
            SENSITIVITY_UNITS[self.sensitivity_unit.get()],
        )
    }
}

impl Component for PreAmplifier {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_round_trip() {
        for level in 0..=26 {
            let value_idx = PreAmplifier::value_index(level);
            let unit_idx = PreAmplifier::unit_index(level);
            assert_eq!(PreAmplifier::level_from_indices(value_idx, unit_idx), level);
        }
    }

    #[test]
    fn test_level_decomposition() {
        // Level 13 -> value "20", unit "nA/V"
        assert_eq!(PreAmplifier::value_index(13), 4);
        assert_eq!(PreAmplifier::unit_index(13), 1);
        // Level 27 -> value "1", unit "mA/V"
        assert_eq!(PreAmplifier::value_index(27), 0);
        assert_eq!(PreAmplifier::unit_index(27), 3);
    }

    #[tokio::test]
    async fn test_set_gain_level_writes_value_and_unit() {
        let preamp = PreAmplifier::new("preamp", GainConfig::default());
        let status = preamp.set_gain_level(13).expect("in range");
        assert_eq!(preamp.sensitivity_value.get(), 4);
        assert_eq!(preamp.sensitivity_unit.get(), 1);
        assert_eq!(preamp.gain_level(), 13);
        assert_eq!(preamp.sensitivity(), ("20", "nA/V"));
        assert!(!status.is_done()); // settle timer pending
    }

    #[tokio::test]
    async fn test_offset_tracks_gain_level() {
        let preamp = PreAmplifier::new("preamp", GainConfig::default());
        preamp.set_gain_level(13).expect("in range");
        // Offset sits offset_difference (-3) levels below: level 10.
        assert_eq!(preamp.offset_value.get(), PreAmplifier::value_index(10));
        assert_eq!(preamp.offset_unit.get(), PreAmplifier::unit_index(10));
    }

    #[tokio::test]
    async fn test_offset_clamped_at_zero() {
        let preamp = PreAmplifier::new("preamp", GainConfig::default());
        preamp.set_gain_level(1).expect("in range");
        assert_eq!(preamp.offset_value.get(), 0);
        assert_eq!(preamp.offset_unit.get(), 0);
    }

    #[tokio::test]
    async fn test_gain_overflow_is_atomic() {
        let preamp = PreAmplifier::new("preamp", GainConfig::default());
        preamp.set_gain_level(27).expect("at gain_max");
        let value_before = preamp.sensitivity_value.get();
        let unit_before = preamp.sensitivity_unit.get();

        let err = preamp.set_gain_level(28).expect_err("beyond gain_max");
        assert!(matches!(
            err,
            BeamlineError::GainOverflow { requested: 28, gain_max: 27, .. }
        ));
        assert_eq!(preamp.sensitivity_value.get(), value_before);
        assert_eq!(preamp.sensitivity_unit.get(), unit_before);
    }

    #[tokio::test]
    async fn test_gain_overflow_below_min() {
        let preamp = PreAmplifier::new("preamp", GainConfig::default());
        let err = preamp.set_gain_level(-1).expect_err("below gain_min");
        assert!(matches!(err, BeamlineError::GainOverflow { requested: -1, .. }));
    }

    #[tokio::test]
    async fn test_gain_range_clamped_to_tables() {
        let config = GainConfig {
            gain_min: -5,
            gain_max: 40,
            ..GainConfig::default()
        };
        let preamp = PreAmplifier::new("preamp", config);
        preamp.set_gain_level(13).expect("in range");

        // A level past the last table entry overflows before anything is
        // written, even though it is inside the configured bounds.
        let err = preamp.set_gain_level(38).expect_err("beyond the tables");
        assert!(matches!(
            err,
            BeamlineError::GainOverflow { requested: 38, gain_max: MAX_GAIN_LEVEL, .. }
        ));
        assert_eq!(preamp.sensitivity_value.get(), 4);
        assert_eq!(preamp.sensitivity_unit.get(), 1);

        // Negative levels are rejected the same way.
        let err = preamp.set_gain_level(-1).expect_err("negative level");
        assert!(matches!(err, BeamlineError::GainOverflow { gain_min: 0, .. }));
        assert_eq!(preamp.gain_level(), 13);
    }

    #[tokio::test]
    async fn test_custom_gain_range() {
        let config = GainConfig {
            gain_min: 5,
            gain_max: 20,
            ..GainConfig::default()
        };
        let preamp = PreAmplifier::new("preamp", config);
        assert!(preamp.set_gain_level(4).is_err());
        assert!(preamp.set_gain_level(5).is_ok());
        assert!(preamp.set_gain_level(20).is_ok());
        assert!(preamp.set_gain_level(21).is_err());
    }

    #[tokio::test]
    async fn test_gain_from_sensitivity() {
        let preamp = PreAmplifier::new("preamp", GainConfig::default());
        // Level 10 -> "2" nA/V -> inverse gain 2e-9 A/V -> gain 5e8 V/A.
        preamp.set_gain_level(10).expect("in range");
        assert!((preamp.gain() - 5e8).abs() / 5e8 < 1e-12);
        assert!((preamp.gain_db() - 10.0 * 5e8_f64.log10()).abs() < 1e-9);
    }

    #[test]
    fn test_settle_table() {
        // pA/V end settles slowly, everything else at the 0.5 s default.
        assert_eq!(
            settle_time(0, 0, GainMode::LowNoise),
            Duration::from_secs_f64(3.0)
        );
        assert_eq!(
            settle_time(0, 0, GainMode::HighBw),
            Duration::from_secs_f64(2.5)
        );
        // Low-drift settles like low-noise.
        assert_eq!(
            settle_time(0, 0, GainMode::LowDrift),
            Duration::from_secs_f64(3.0)
        );
        assert_eq!(settle_time(4, 1, GainMode::LowNoise), DEFAULT_SETTLE);
    }
}
