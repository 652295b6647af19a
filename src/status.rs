//! Completion handles for in-flight hardware operations.
//!
//! Every call that talks to hardware returns immediately with a [`Status`];
//! actual completion is signalled asynchronously. Callers can poll
//! [`Status::is_done`] or await [`Status::wait`]. Statuses are cheap clones of
//! a shared handle, and identity is observable via [`Status::same`]. The
//! trigger-coordination layer relies on handing the *same* status back to
//! every caller that joins an acquisition already in flight.
//!
//! Composite operations (a gain change touching several signals at once) use
//! [`Status::all`], which reports done only when every constituent write has
//! completed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Handle representing an in-flight hardware operation.
///
/// Cloning a `Status` yields another handle to the same operation; all clones
/// observe completion together and compare identity-equal under
/// [`Status::same`].
#[derive(Clone, Debug)]
pub struct Status {
    inner: Arc<watch::Receiver<bool>>,
}

impl Status {
    /// Create a pending status along with the [`Completer`] that finishes it.
    pub fn pending() -> (Status, Completer) {
        let (tx, rx) = watch::channel(false);
        (Status { inner: Arc::new(rx) }, Completer { tx })
    }

    /// Create a status that is already complete.
    ///
    /// Used for writes that finish synchronously (no settle time); does not
    /// require a runtime.
    pub fn done_now() -> Status {
        let (tx, rx) = watch::channel(true);
        drop(tx);
        Status { inner: Arc::new(rx) }
    }

    /// Create a status that completes after `delay`.
    ///
    /// Spawns a timer task; must be called from within a Tokio runtime unless
    /// `delay` is zero.
    pub fn after(delay: Duration) -> Status {
        if delay.is_zero() {
            return Status::done_now();
        }
        let (status, completer) = Status::pending();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            completer.complete();
        });
        status
    }

    /// Combine several statuses into one that is done only when all are done.
    ///
    /// Completes immediately (without spawning) when every constituent is
    /// already done.
    pub fn all(statuses: impl IntoIterator<Item = Status>) -> Status {
        let pending: Vec<Status> = statuses
            .into_iter()
            .filter(|st| !st.is_done())
            .collect();
        if pending.is_empty() {
            return Status::done_now();
        }
        let (status, completer) = Status::pending();
        tokio::spawn(async move {
            for st in pending {
                st.wait().await;
            }
            completer.complete();
        });
        status
    }

    /// Whether the operation has completed.
    ///
    /// This is the lazy observation point used by the trigger coordinator: no
    /// callback fires on completion, the next interested caller simply checks.
    pub fn is_done(&self) -> bool {
        *self.inner.borrow()
    }

    /// Wait until the operation completes.
    pub async fn wait(&self) {
        let mut rx = (*self.inner).clone();
        // wait_for returns Err only once the sender is gone, at which point
        // the last observed value is authoritative.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Identity comparison: do two handles refer to the same operation?
    pub fn same(a: &Status, b: &Status) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Marks a pending [`Status`] as complete.
///
/// Dropping a completer without calling [`Completer::complete`] also finishes
/// the status, so an abandoned operation never leaves waiters hanging.
#[derive(Debug)]
pub struct Completer {
    tx: watch::Sender<bool>,
}

impl Completer {
    /// Mark the associated status done.
    pub fn complete(self) {
        let _ = self.tx.send(true);
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}
