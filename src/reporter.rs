//! The capability that receives faults on the default launch path.
//!
//! Anything implementing [`Reporter`] can be installed as the process-wide
//! reporter with [`install_reporter`](crate::install_reporter), or handed
//! directly to a [`Launcher`](crate::Launcher). Closures taking
//! `(&Fault, &Trace)` implement the trait automatically.
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use strandguard::{Fault, Reporter, trace::Trace};
//!
//! struct CountingReporter(AtomicUsize);
//!
//! impl Reporter for CountingReporter {
//!     fn report(&self, _fault: &Fault, _trace: &Trace) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! strandguard::install_reporter(CountingReporter(AtomicUsize::new(0)));
//! ```

use std::io::{self, Write};

use crate::{fault::Fault, trace::Trace};

/// Records a fault together with the trace captured when it was intercepted.
///
/// Reporters run on the strand whose task panicked, so they may be invoked
/// from many threads at once. A reporter that itself panics is contained and
/// logged; it never takes the process down.
pub trait Reporter: 'static + Send + Sync {
    /// Records `fault` and `trace`.
    fn report(&self, fault: &Fault, trace: &Trace);
}

impl<F> Reporter for F
where
    F: 'static + Send + Sync + Fn(&Fault, &Trace),
{
    fn report(&self, fault: &Fault, trace: &Trace) {
        (self)(fault, trace)
    }
}

/// The reporter installed when the process starts.
///
/// Writes the fault and its trace to standard error:
///
/// ```text
/// fault in guarded strand: worker 3 gave up
/// fetch_batch - /home/user/app/src/worker.rs:42
/// {{closure}} - /home/user/app/src/main.rs:17
/// note: 31 frame(s) omitted. For a complete trace, set RUST_BACKTRACE=full.
/// ```
#[derive(Copy, Clone, Debug, Default)]
pub struct StderrReporter;

impl StderrReporter {
    pub(crate) fn write_to<W: Write>(
        &self,
        mut out: W,
        fault: &Fault,
        trace: &Trace,
    ) -> io::Result<()> {
        writeln!(out, "fault in guarded strand: {fault}")?;
        write!(out, "{trace}")?;
        out.flush()
    }
}

impl Reporter for StderrReporter {
    fn report(&self, fault: &Fault, trace: &Trace) {
        // Nowhere left to report a failing stderr.
        let _ = self.write_to(io::stderr().lock(), fault, trace);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::trace::TraceFilter;

    #[test]
    fn test_stderr_reporter_output() {
        let fault = Fault::new("disk on fire");
        let trace = Trace::capture(&TraceFilter::disabled());
        let mut out = Vec::new();
        StderrReporter
            .write_to(&mut out, &fault, &trace)
            .expect("writing to a Vec cannot fail");
        assert_eq!(
            String::from_utf8(out).expect("output is utf-8"),
            "fault in guarded strand: disk on fire\n<trace capture disabled>\n"
        );
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reporter = {
            let seen = Arc::clone(&seen);
            move |fault: &Fault, _trace: &Trace| {
                seen.lock().expect("lock poisoned").push(fault.to_string());
            }
        };
        let trace = Trace::capture(&TraceFilter::disabled());
        reporter.report(&Fault::new("one"), &trace);
        reporter.report(&Fault::new(String::from("two")), &trace);
        assert_eq!(*seen.lock().expect("lock poisoned"), ["one", "two"]);
    }
}
