//! Observable process values.
//!
//! Reactive signal layer using `tokio::sync::watch` for multi-subscriber
//! notifications. A [`Signal`] is the in-process seam where a hardware
//! abstraction (EPICS channel access, a serial driver, a simulator) would
//! attach: devices read and write signals, and anything else (GUIs, data
//! writers, other devices) subscribes for changes.
//!
//! Writes apply synchronously but report completion through a [`Status`],
//! optionally delayed by a settle time. A pre-amplifier's RC relaxation after
//! a gain change is the motivating case: the new value is in effect at once,
//! but the electronics are not trustworthy until the settle elapses.
//!
//! # Example
//!
//! ```rust,ignore
//! let clock_frequency = Signal::new("clock_frequency", 9.6e6).with_units("Hz");
//!
//! // Subscribe to changes
//! let mut rx = clock_frequency.subscribe();
//! tokio::spawn(async move {
//!     while rx.changed().await.is_ok() {
//!         println!("frequency now {}", *rx.borrow());
//!     }
//! });
//!
//! // Update value (notifies all subscribers)
//! clock_frequency.set(1.0e7)?;
//! ```

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{BeamlineError, BeamlineResult};
use crate::status::Status;

/// Metadata for a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMetadata {
    /// Signal name (unique within a device).
    pub name: String,
    /// Physical units (e.g. "Hz", "A", "s").
    pub units: Option<String>,
    /// Whether this signal rejects writes.
    pub read_only: bool,
}

/// A thread-safe observable value with change notifications.
///
/// Uses `tokio::sync::watch` internally so subscribers can wait for changes
/// without polling. Cloning a `Signal` shares the underlying channel: writes
/// through any clone are visible to all.
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The watch channel sender (holds the current value).
    sender: watch::Sender<T>,
    metadata: SignalMetadata,
    /// Optional validation function, checked before every write.
    validator: Option<Arc<dyn Fn(&T) -> BeamlineResult<()> + Send + Sync>>,
    /// Default settle time applied to writes.
    settle_time: Duration,
}

impl<T: Clone + Send + Sync + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("metadata", &self.metadata)
            .field("has_validator", &self.validator.is_some())
            .field("settle_time", &self.settle_time)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(), // shares the same watch channel
            metadata: self.metadata.clone(),
            validator: self.validator.clone(),
            settle_time: self.settle_time,
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            metadata: SignalMetadata {
                name: name.into(),
                units: None,
                read_only: false,
            },
            validator: None,
            settle_time: Duration::ZERO,
        }
    }

    /// Add units to this signal.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.metadata.units = Some(units.into());
        self
    }

    /// Apply a default settle time to every write.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle_time = settle;
        self
    }

    /// Mark this signal as read-only.
    pub fn read_only(mut self) -> Self {
        self.metadata.read_only = true;
        self
    }

    /// Add a custom validator function.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> BeamlineResult<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the signal name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Get the metadata.
    pub fn metadata(&self) -> &SignalMetadata {
        &self.metadata
    }

    /// Write a new value, notifying all subscribers.
    ///
    /// The value is applied synchronously; the returned [`Status`] completes
    /// once the signal's default settle time has elapsed (immediately if no
    /// settle time is configured).
    ///
    /// Returns an error if the signal is read-only or validation fails.
    pub fn set(&self, value: T) -> BeamlineResult<Status> {
        self.set_with_settle(value, self.settle_time)
    }

    /// Write a new value with an explicit settle time.
    ///
    /// Used where the settle depends on the value being written (gain
    /// changes); otherwise identical to [`Signal::set`].
    pub fn set_with_settle(&self, value: T, settle: Duration) -> BeamlineResult<Status> {
        if self.metadata.read_only {
            return Err(BeamlineError::SignalReadOnly(self.metadata.name.clone()));
        }
        if let Some(validator) = &self.validator {
            validator(&value)?;
        }
        self.sender.send_replace(value);
        Ok(Status::after(settle))
    }

    /// Write a new value bypassing validation (internal use).
    pub(crate) fn set_unchecked(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to value changes.
    ///
    /// ```rust,ignore
    /// let mut rx = signal.subscribe();
    /// while rx.changed().await.is_ok() {
    ///     let value = rx.borrow().clone();
    ///     // Handle new value
    /// }
    /// ```
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Check if there are any active subscribers.
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialOrd + Debug + 'static,
{
    /// Add min/max range validation (inclusive bounds).
    pub fn with_range(mut self, min: T, max: T) -> Self {
        let name = self.metadata.name.clone();
        self.validator = Some(Arc::new(move |value: &T| {
            if value < &min || value > &max {
                Err(BeamlineError::SignalInvalidValue {
                    signal: name.clone(),
                    message: format!("{value:?} out of range [{min:?}, {max:?}]"),
                })
            } else {
                Ok(())
            }
        }));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_basic() {
        let sig = Signal::new("test", 42);
        assert_eq!(sig.get(), 42);
        assert_eq!(sig.name(), "test");

        let st = sig.set(100).expect("writable signal");
        assert!(st.is_done());
        assert_eq!(sig.get(), 100);
    }

    #[test]
    fn test_signal_with_metadata() {
        let sig = Signal::new("clock_frequency", 9.6e6).with_units("Hz");
        assert_eq!(sig.metadata().units.as_deref(), Some("Hz"));
    }

    #[test]
    fn test_signal_range_validation() {
        let sig = Signal::new("preset_time", 1.0).with_range(0.0, 100.0);

        assert!(sig.set(50.0).is_ok());
        assert!(sig.set(-1.0).is_err());
        assert!(sig.set(150.0).is_err());
        assert_eq!(sig.get(), 50.0);
    }

    #[test]
    fn test_signal_read_only() {
        let sig = Signal::new("model", "SR-570".to_string()).read_only();

        let err = sig.set("other".to_string()).expect_err("read-only");
        assert!(matches!(err, BeamlineError::SignalReadOnly(_)));
        assert_eq!(sig.get(), "SR-570");
    }

    #[test]
    fn test_signal_clone_shares_channel() {
        let sig = Signal::new("value", 0);
        let copy = sig.clone();
        copy.set(7).expect("writable signal");
        assert_eq!(sig.get(), 7);
    }

    #[tokio::test]
    async fn test_signal_subscription() {
        let sig = Signal::new("value", 0);
        let mut rx = sig.subscribe();

        assert_eq!(*rx.borrow(), 0);

        sig.set(42).expect("writable signal");
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_settle_time() {
        let sig = Signal::new("sens_num", 3usize).with_settle_time(Duration::from_millis(500));

        let st = sig.set(4).expect("writable signal");
        // Value applies at once; completion waits on the settle timer.
        assert_eq!(sig.get(), 4);
        assert!(!st.is_done());
        st.wait().await;
        assert!(st.is_done());
    }
}
