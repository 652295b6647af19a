//! Custom error types for the beamline control layer.
//!
//! This module defines the primary error type, `BeamlineError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the different kinds of failures the control layer can hit,
//! from configuration problems to registry lookups and gain-range violations.
//!
//! ## Error taxonomy
//!
//! The registry and gain-control errors mirror how callers are expected to
//! react to them:
//!
//! - **`ComponentNotFound`**: a registry query matched nothing. Surfaced to the
//!   caller, never retried.
//! - **`MultipleComponentsFound`**: a singular `find()` matched more than one
//!   component. The caller must refine the query or use `findall()`.
//! - **`InvalidComponentLabel`**: a label criterion that cannot be evaluated
//!   (an empty label string).
//! - **`GainOverflow`**: a requested sensitivity level fell outside the
//!   configured `[gain_min, gain_max]` range. The gain state is left unchanged;
//!   whether to stop, skip, or pick a different level is the caller's call.
//!
//! All of these are raised synchronously at the call site and are never
//! swallowed internally. `#[from]` conversions cover the configuration and I/O
//! layers so `?` works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type BeamlineResult<T> = std::result::Result<T, BeamlineError>;

/// Errors raised by the beamline control layer.
#[derive(Error, Debug)]
pub enum BeamlineError {
    /// Configuration file or environment could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A registry query matched no components.
    #[error("Could not find components matching: {0}")]
    ComponentNotFound(String),

    /// A singular `find()` matched more than one component.
    #[error("Found {count} components matching {query}; consider using findall()")]
    MultipleComponentsFound {
        /// Description of the offending query.
        query: String,
        /// How many components matched.
        count: usize,
    },

    /// A label criterion could not be evaluated.
    #[error("Invalid component label: {0:?}")]
    InvalidComponentLabel(String),

    /// A sensitivity level outside the configured gain range was requested.
    #[error("Cannot set {device} outside range ({gain_min}, {gain_max}), received {requested}")]
    GainOverflow {
        /// Name of the device whose gain change was rejected.
        device: String,
        /// The out-of-range level that was requested.
        requested: i64,
        /// Lower bound of the allowed range.
        gain_min: i64,
        /// Upper bound of the allowed range.
        gain_max: i64,
    },

    /// Attempted to write a read-only signal.
    #[error("Signal '{0}' is read-only")]
    SignalReadOnly(String),

    /// A signal write failed validation.
    #[error("Invalid value for signal '{signal}': {message}")]
    SignalInvalidValue {
        /// Name of the signal that rejected the value.
        signal: String,
        /// What the validator objected to.
        message: String,
    },

    /// General instrument-level failure.
    #[error("Instrument error: {0}")]
    Instrument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BeamlineError::ComponentNotFound("label=\"shutters\"".to_string());
        assert_eq!(
            err.to_string(),
            "Could not find components matching: label=\"shutters\""
        );
    }

    #[test]
    fn test_gain_overflow_display() {
        let err = BeamlineError::GainOverflow {
            device: "I0".to_string(),
            requested: 28,
            gain_min: 0,
            gain_max: 27,
        };
        assert_eq!(
            err.to_string(),
            "Cannot set I0 outside range (0, 27), received 28"
        );
    }

    #[test]
    fn test_multiple_components_display() {
        let err = BeamlineError::MultipleComponentsFound {
            query: "label=\"ion_chambers\"".to_string(),
            count: 4,
        };
        assert!(err.to_string().contains("Found 4 components"));
    }
}
