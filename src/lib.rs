//! Beamline control glue for triggered ion-chamber measurements.
//!
//! This library provides the coordination layer between configuration and
//! counting hardware at a synchrotron beamline: a queryable registry of
//! instantiated devices, and the gain/trigger plumbing for ion chambers
//! counting on a shared multi-channel scaler through SRS-570-style
//! pre-amplifiers.
//!
//! Typical use: load a [`config::BeamlineConfig`], build the device tree with
//! [`load::load_instrument`], then look devices up by name or label through
//! the [`registry::InstrumentRegistry`].

pub mod config;
pub mod error;
pub mod ion_chamber;
pub mod load;
pub mod preamp;
pub mod registry;
pub mod scaler;
pub mod signal;
pub mod status;

pub use config::BeamlineConfig;
pub use error::{BeamlineError, BeamlineResult};
pub use ion_chamber::IonChamber;
pub use load::load_instrument;
pub use preamp::{GainConfig, GainMode, PreAmplifier};
pub use registry::{Component, InstrumentRegistry, Query};
pub use scaler::{Scaler, TriggerCoordinator};
pub use signal::Signal;
pub use status::Status;
