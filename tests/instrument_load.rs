//! End-to-end test: configuration file to triggered readings.

use std::io::Write;
use std::sync::Arc;

use beamline_daq::preamp::{SENSITIVITY_UNITS, SENSITIVITY_VALUES};
use beamline_daq::{
    load_instrument, BeamlineConfig, BeamlineError, InstrumentRegistry, IonChamber, Query, Status,
};

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
        [beamline]
        name = "25-ID-C"

        [scaler]
        prefix = "255idcVME:scaler1"
        num_channels = 32
        clock_frequency = 9.6e6
        preset_time = "1s"

        [[ion_chambers]]
        name = "I0"
        channel = 2

        [[ion_chambers]]
        name = "It"
        channel = 3
        "#
    )
    .expect("write config");
    file
}

fn load_beamline() -> (InstrumentRegistry, Vec<Arc<IonChamber>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = write_config();
    let config = BeamlineConfig::from_path(file.path()).expect("load config");
    let mut registry = InstrumentRegistry::new();
    let chambers = load_instrument(&config, &mut registry).expect("load instrument");
    (registry, chambers)
}

#[tokio::test]
async fn gain_walk_and_overflow() {
    let (registry, _chambers) = load_beamline();
    let i0 = registry
        .find_as::<IonChamber>(&Query::name("I0"))
        .expect("I0 registered");

    i0.preamp.set_gain_level(13).expect("in range");

    // Walk up three levels, checking the decomposed value/unit at each step.
    for (expected_level, value, unit) in [(14, "50", "nA/V"), (15, "100", "nA/V"), (16, "200", "nA/V")] {
        i0.increase_gain().expect("in range");
        assert_eq!(i0.preamp.gain_level(), expected_level);
        assert_eq!(
            SENSITIVITY_VALUES[i0.preamp.sensitivity_value.get()],
            value
        );
        assert_eq!(SENSITIVITY_UNITS[i0.preamp.sensitivity_unit.get()], unit);
    }

    // At the top of the range a further increase overflows without writing.
    i0.preamp.set_gain_level(27).expect("at gain_max");
    let err = i0.increase_gain().expect_err("beyond gain_max");
    match err {
        BeamlineError::GainOverflow {
            device,
            requested,
            gain_min,
            gain_max,
        } => {
            assert_eq!(device, "I0");
            assert_eq!(requested, 28);
            assert_eq!((gain_min, gain_max), (0, 27));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(i0.preamp.gain_level(), 27);
}

#[tokio::test(start_paused = true)]
async fn shared_trigger_is_idempotent() {
    let (registry, chambers) = load_beamline();
    let i0 = registry
        .find_as::<IonChamber>(&Query::name("I0"))
        .expect("I0 registered");
    let it = registry
        .find_as::<IonChamber>(&Query::name("It"))
        .expect("It registered");

    let first = i0.trigger();
    let joined = it.trigger();
    assert!(Status::same(&first, &joined));
    assert!(i0.scaler().is_counting());

    first.wait().await;
    assert!(!i0.scaler().is_counting());

    // The finished acquisition left clock ticks for the time base.
    let clock = chambers[0].scaler().channel(0).expect("clock channel");
    assert_eq!(clock.raw_count.get(), 9_600_000);
    assert_eq!(i0.acquisition_time(), 1.0);

    // The next trigger starts a fresh acquisition.
    let fresh = i0.trigger();
    assert!(!Status::same(&first, &fresh));
    fresh.wait().await;
}

#[tokio::test]
async fn registry_queries_cover_device_tree() {
    let (registry, _chambers) = load_beamline();

    // Scaler, two chambers, two preamps.
    assert_eq!(registry.len(), 5);
    let detectors = registry
        .findall(&Query::label("detectors"))
        .expect("label query");
    assert_eq!(detectors.len(), 2);

    // A singular find over a plural label is an error.
    let err = registry
        .find(&Query::label("ion_chambers"))
        .err()
        .expect("two matches");
    assert!(matches!(err, BeamlineError::MultipleComponentsFound { count: 2, .. }));

    // Free-text lookup matches names and labels alike.
    assert_eq!(registry.findall(&Query::any("I0")).expect("any query").len(), 1);
}
