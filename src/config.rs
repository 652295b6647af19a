//! Beamline configuration loading via Figment.
//!
//! Configuration comes from a TOML file merged with environment overrides
//! (prefixed `BEAMLINE_`, nested keys separated by `__`):
//!
//! ```text
//! BEAMLINE_SCALER__PREFIX="255idcVME:scaler1"
//! BEAMLINE_SCALER__NUM_CHANNELS=32
//! ```
//!
//! # Example
//!
//! ```toml
//! [beamline]
//! name = "25-ID-C"
//!
//! [scaler]
//! prefix = "255idcVME:scaler1"
//! num_channels = 32
//! clock_frequency = 9.6e6
//! preset_time = "1s"
//!
//! [[ion_chambers]]
//! name = "I0"
//! channel = 2
//! counts_per_volt_second = 1e7
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BeamlineError, BeamlineResult};
use crate::preamp::{GainConfig, MAX_GAIN_LEVEL};

/// Top-level beamline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamlineConfig {
    /// Beamline identity.
    pub beamline: BeamlineInfo,
    /// The shared counting scaler.
    pub scaler: ScalerConfig,
    /// Detector channels on the scaler.
    #[serde(default)]
    pub ion_chambers: Vec<IonChamberConfig>,
}

/// Beamline identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamlineInfo {
    /// Beamline name, e.g. "25-ID-C".
    pub name: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Shared scaler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// Hardware record prefix, also the trigger-coordination key.
    pub prefix: String,
    /// Number of input channels.
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
    /// Internal clock frequency in Hz.
    #[serde(default = "default_clock_frequency")]
    pub clock_frequency: f64,
    /// Default counting time per acquisition (humantime format, e.g. "500ms").
    #[serde(with = "humantime_serde", default = "default_preset_time")]
    pub preset_time: Duration,
}

/// One ion chamber definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IonChamberConfig {
    /// Registry name, e.g. "I0".
    pub name: String,
    /// Scaler channel index (channel 0 is the clock).
    pub channel: usize,
    /// Voltage-to-frequency conversion factor.
    #[serde(default = "default_counts_per_volt_second")]
    pub counts_per_volt_second: f64,
    /// Extra registry labels; empty keeps the device defaults.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pre-amplifier gain range.
    #[serde(default)]
    pub gain: GainConfig,
}

fn default_num_channels() -> usize {
    32
}

fn default_clock_frequency() -> f64 {
    9.6e6
}

fn default_preset_time() -> Duration {
    Duration::from_secs(1)
}

fn default_counts_per_volt_second() -> f64 {
    1e7
}

impl BeamlineConfig {
    /// Load configuration from a TOML file merged with `BEAMLINE_` environment
    /// overrides, then validate it.
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Errors
    ///
    /// [`BeamlineError::Config`] when the file cannot be loaded or parsed, and
    /// [`BeamlineError::Configuration`] when it parses but fails validation.
    pub fn from_path<P: AsRef<Path>>(path: P) -> BeamlineResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BEAMLINE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    ///
    /// Checks:
    /// - Scaler prefix is nonempty and clock frequency is positive
    /// - The scaler has at least a clock channel plus one input
    /// - Every ion chamber names a channel in `[1, num_channels)`
    /// - Device names are nonempty and unique
    /// - Every gain range is non-inverted and within the sensitivity tables
    pub fn validate(&self) -> BeamlineResult<()> {
        if self.scaler.prefix.is_empty() {
            return Err(BeamlineError::Configuration(
                "Scaler 'prefix' cannot be empty".to_string(),
            ));
        }
        if self.scaler.clock_frequency <= 0.0 {
            return Err(BeamlineError::Configuration(format!(
                "Scaler 'clock_frequency' must be positive, got {}",
                self.scaler.clock_frequency
            )));
        }
        if self.scaler.num_channels < 2 {
            return Err(BeamlineError::Configuration(format!(
                "Scaler 'num_channels' must be at least 2 (clock plus one input), got {}",
                self.scaler.num_channels
            )));
        }

        let mut names = HashSet::new();
        for chamber in &self.ion_chambers {
            if chamber.name.is_empty() {
                return Err(BeamlineError::Configuration(
                    "Ion chamber 'name' cannot be empty".to_string(),
                ));
            }
            if !names.insert(chamber.name.as_str()) {
                return Err(BeamlineError::Configuration(format!(
                    "Duplicate ion chamber name: '{}'",
                    chamber.name
                )));
            }
            if chamber.channel == 0 || chamber.channel >= self.scaler.num_channels {
                return Err(BeamlineError::Configuration(format!(
                    "Ion chamber '{}': channel {} must be in [1, {})",
                    chamber.name, chamber.channel, self.scaler.num_channels
                )));
            }
            if chamber.gain.gain_min > chamber.gain.gain_max {
                return Err(BeamlineError::Configuration(format!(
                    "Ion chamber '{}': gain_min {} exceeds gain_max {}",
                    chamber.name, chamber.gain.gain_min, chamber.gain.gain_max
                )));
            }
            if chamber.gain.gain_min < 0 || chamber.gain.gain_max > MAX_GAIN_LEVEL {
                return Err(BeamlineError::Configuration(format!(
                    "Ion chamber '{}': gain range [{}, {}] outside the representable [0, {}]",
                    chamber.name,
                    chamber.gain.gain_min,
                    chamber.gain.gain_max,
                    MAX_GAIN_LEVEL
                )));
            }
        }
        Ok(())
    }
}
