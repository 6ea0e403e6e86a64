//! Trace capture at the moment a guarded task panics.
//!
//! Once `catch_unwind` returns, the frames that panicked are gone. A chained
//! panic hook, installed once per process, captures the trace while they are
//! still on the stack. Only threads armed by the launcher capture anything;
//! every other panic goes straight to the previously installed hook.
//!
//! A hook installed by the application after the first launch replaces this
//! one. Traces are then captured at the interception point instead.

use std::{cell::RefCell, panic, sync::Once, thread};

use crate::trace::{Trace, TraceFilter};

struct Armed {
    filter: TraceFilter,
    trace: Option<Trace>,
}

thread_local! {
    static ARMED: RefCell<Option<Armed>> = const { RefCell::new(None) };
}

/// Chains the capturing hook in front of the current one, once.
pub(crate) fn install() {
    static INSTALL: Once = Once::new();

    // `set_hook` panics on a panicking thread. Try again on the next launch.
    if thread::panicking() {
        return;
    }
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            capture_if_armed();
            previous(info);
        }));
    });
}

/// Marks the current thread as a guarded strand capturing with `filter`.
pub(crate) fn arm(filter: TraceFilter) {
    ARMED.with(|armed| {
        *armed.borrow_mut() = Some(Armed {
            filter,
            trace: None,
        });
    });
}

/// Unmarks the current thread and returns the trace captured by its most
/// recent panic.
pub(crate) fn disarm() -> Option<Trace> {
    ARMED
        .with(|armed| armed.borrow_mut().take())
        .and_then(|armed| armed.trace)
}

fn capture_if_armed() {
    let _ = ARMED.try_with(|armed| {
        if let Ok(mut slot) = armed.try_borrow_mut()
            && let Some(state) = slot.as_mut()
        {
            state.trace = Some(Trace::capture(&state.filter));
        }
    });
}

#[cfg(test)]
mod tests {
    use std::panic::catch_unwind;

    use super::*;

    #[inline(never)]
    fn failing_step() {
        panic!("failing step");
    }

    #[test]
    fn test_armed_thread_captures_panic_site() {
        install();
        arm(TraceFilter::FULL);
        let result = catch_unwind(failing_step);
        let trace = disarm().expect("armed thread should capture a trace");

        assert!(result.is_err());
        assert!(trace.frames().next().is_some());
        assert!(trace.to_string().contains("failing_step"));
    }

    #[test]
    fn test_unarmed_thread_captures_nothing() {
        install();
        let result = catch_unwind(failing_step);

        assert!(result.is_err());
        assert!(disarm().is_none());
    }

    #[test]
    fn test_disarm_without_panic() {
        arm(TraceFilter::FULL);
        assert!(disarm().is_none());
        assert!(disarm().is_none());
    }
}
