//! The process-wide default reporter.
//!
//! Faults intercepted by [`launch`](crate::launch) are handed to whatever
//! reporter is installed here at the moment the fault is caught. The slot
//! starts out holding a [`StderrReporter`] and can be swapped any number of
//! times, from any thread.
//!
//! ```rust
//! use strandguard::{Fault, trace::Trace};
//!
//! let previous = strandguard::install_reporter(|fault: &Fault, _: &Trace| {
//!     eprintln!("custom: {fault}");
//! });
//! assert!(previous.is_some());
//!
//! // Faults on the default path are now dropped without a word.
//! strandguard::clear_reporter();
//! assert!(strandguard::reporter().is_none());
//!
//! strandguard::reset_reporter();
//! ```

use std::sync::{Arc, LazyLock};

use crate::reporter::{Reporter, StderrReporter};

/// The slot holding the current reporter.
///
/// Readers clone the `Arc` and drop the guard before doing anything else, so
/// the lock is never held while a reporter runs. `spin::RwLock` cannot be
/// poisoned, which keeps every accessor infallible.
struct ReporterSlot(spin::RwLock<Option<Arc<dyn Reporter>>>);

impl ReporterSlot {
    fn builtin() -> Self {
        Self(spin::RwLock::new(Some(Arc::new(StderrReporter))))
    }

    #[inline]
    fn fetch(&self) -> Option<Arc<dyn Reporter>> {
        self.0.read().clone()
    }

    #[inline]
    fn replace(&self, new: Option<Arc<dyn Reporter>>) -> Option<Arc<dyn Reporter>> {
        core::mem::replace(&mut *self.0.write(), new)
    }
}

static REPORTER: LazyLock<ReporterSlot> = LazyLock::new(ReporterSlot::builtin);

/// Returns the reporter currently installed, if any.
pub fn reporter() -> Option<Arc<dyn Reporter>> {
    REPORTER.fetch()
}

/// Replaces the process-wide reporter and returns the previous one.
///
/// Passing `None` leaves no reporter installed: faults on the default path
/// are then intercepted and discarded. Concurrent calls are serialised; the
/// last one to take the lock wins.
pub fn set_reporter(reporter: Option<Arc<dyn Reporter>>) -> Option<Arc<dyn Reporter>> {
    tracing::debug!(installed = reporter.is_some(), "replacing fault reporter");
    REPORTER.replace(reporter)
}

/// Installs `reporter` as the process-wide reporter and returns the previous
/// one.
pub fn install_reporter<R: Reporter>(reporter: R) -> Option<Arc<dyn Reporter>> {
    set_reporter(Some(Arc::new(reporter)))
}

/// Removes the process-wide reporter, returning it.
pub fn clear_reporter() -> Option<Arc<dyn Reporter>> {
    set_reporter(None)
}

/// Reinstalls the built-in [`StderrReporter`], returning the previous
/// reporter.
pub fn reset_reporter() -> Option<Arc<dyn Reporter>> {
    install_reporter(StderrReporter)
}

/// Serialises unit tests that touch the process-wide slot.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
