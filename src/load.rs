//! Explicit instrument factory.
//!
//! Builds the beamline's device tree from a validated [`BeamlineConfig`] and
//! registers it: one shared [`Scaler`] behind a single [`TriggerCoordinator`],
//! then one [`PreAmplifier`] + [`IonChamber`] pair per configured channel.
//! Registration happens through the registry passed in by the caller, so
//! nothing here is global and re-loading after [`InstrumentRegistry::clear`]
//! is the supported configuration-reload path.

use std::sync::Arc;

use crate::config::BeamlineConfig;
use crate::error::BeamlineResult;
use crate::ion_chamber::IonChamber;
use crate::preamp::PreAmplifier;
use crate::registry::{Component, InstrumentRegistry};
use crate::scaler::{Scaler, TriggerCoordinator};

/// Build and register all configured devices.
///
/// Returns the constructed ion chambers in configuration order; the shared
/// scaler and each pre-amplifier are also registered (the pre-amplifiers
/// through sub-component registration).
///
/// # Errors
///
/// Configuration validation failures and invalid channel assignments; on
/// error the registry may hold a partial set of devices, so callers reloading
/// should [`InstrumentRegistry::clear`] first.
pub fn load_instrument(
    config: &BeamlineConfig,
    registry: &mut InstrumentRegistry,
) -> BeamlineResult<Vec<Arc<IonChamber>>> {
    config.validate()?;

    let coordinator = Arc::new(TriggerCoordinator::new());
    let scaler = Arc::new(Scaler::new(
        config.scaler.prefix.clone(),
        config.scaler.prefix.clone(),
        config.scaler.num_channels,
        config.scaler.clock_frequency,
        coordinator,
    ));
    scaler
        .preset_time
        .set(config.scaler.preset_time.as_secs_f64())?;
    registry.register(Arc::clone(&scaler) as Arc<dyn Component>);
    log::info!(
        "Loaded scaler '{}' with {} channels at {} Hz",
        scaler.prefix(),
        scaler.num_channels(),
        scaler.clock_frequency.get()
    );

    let mut chambers = Vec::with_capacity(config.ion_chambers.len());
    for chamber_config in &config.ion_chambers {
        let preamp = Arc::new(PreAmplifier::new(
            format!("{}_preamp", chamber_config.name),
            chamber_config.gain.clone(),
        ));
        let mut chamber = IonChamber::new(
            chamber_config.name.clone(),
            Arc::clone(&scaler),
            chamber_config.channel,
            preamp,
            chamber_config.counts_per_volt_second,
        )?;
        if !chamber_config.labels.is_empty() {
            chamber = chamber.with_labels(chamber_config.labels.iter().cloned());
        }
        if let Some(channel) = scaler.channel(chamber_config.channel) {
            channel.description.set(chamber_config.name.clone())?;
        }

        let chamber = Arc::new(chamber);
        registry.register(Arc::clone(&chamber) as Arc<dyn Component>);
        log::info!(
            "Loaded ion chamber '{}' on '{}' channel {}",
            chamber_config.name,
            scaler.prefix(),
            chamber_config.channel
        );
        chambers.push(chamber);
    }
    Ok(chambers)
}
