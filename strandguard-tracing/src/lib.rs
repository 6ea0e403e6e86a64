#![deny(
    missing_docs,
    unsafe_code,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]

//! Structured `tracing` output for faults caught by strandguard.
//!
//! [`TracingReporter`] turns every intercepted fault into a single
//! `error`-level event, so panics on background strands end up wherever the
//! rest of your logs go.
//!
//! # Quick Start
//!
//! ```
//! use strandguard_tracing::TracingReporter;
//!
//! // Route every fault on the default path through tracing.
//! TracingReporter::new().install();
//!
//! strandguard::launch(|| panic!("background job failed"));
//! ```
//!
//! Each event carries these fields:
//!
//! - `fault` - the panic message, or a placeholder for non-string payloads
//! - `trace` - the rendered stack trace, unless disabled
//!
//! # Dispatchers
//!
//! Strands run on their own threads, which do not inherit a thread-local
//! default subscriber. A reporter built with
//! [`with_current_dispatch`](TracingReporter::with_current_dispatch) captures
//! the dispatcher active where it was created and emits every event there.
//! Reporters without a pinned dispatcher use the global default.
//!
//! # Environment Variables
//!
//! - `STRANDGUARD_TRACING` - Comma-separated options:
//!   - `no_trace` - Leave the `trace` field out of emitted events

use std::sync::{Arc, OnceLock};

use strandguard::{Fault, Reporter, trace::Trace};
use tracing::Dispatch;

/// A [`Reporter`] that emits each fault as a `tracing` event.
///
/// # Examples
///
/// ```
/// use strandguard::Launcher;
/// use strandguard_tracing::TracingReporter;
///
/// let launcher = Launcher::with_reporter(TracingReporter::new().with_current_dispatch());
/// launcher.launch(|| panic!("flush failed"));
/// ```
#[derive(Clone, Debug)]
pub struct TracingReporter {
    /// Whether events carry the rendered trace in a `trace` field.
    pub include_trace: bool,
    dispatch: Option<Dispatch>,
}

#[derive(Debug)]
struct StrandguardTracingEnvOptions {
    no_trace: bool,
}

impl StrandguardTracingEnvOptions {
    fn get() -> &'static Self {
        static STRANDGUARD_TRACING_FLAGS: OnceLock<StrandguardTracingEnvOptions> = OnceLock::new();

        STRANDGUARD_TRACING_FLAGS.get_or_init(|| {
            let mut no_trace = false;

            if let Some(var) = std::env::var_os("STRANDGUARD_TRACING") {
                for v in var.to_string_lossy().split(',') {
                    if v.trim().eq_ignore_ascii_case("no_trace") {
                        no_trace = true;
                    }
                }
            }

            StrandguardTracingEnvOptions { no_trace }
        })
    }
}

impl TracingReporter {
    /// Creates a reporter that emits through the global default dispatcher.
    ///
    /// Whether the trace is included is controlled by `STRANDGUARD_TRACING`.
    pub fn new() -> Self {
        let env_options = StrandguardTracingEnvOptions::get();

        Self {
            include_trace: !env_options.no_trace,
            dispatch: None,
        }
    }

    /// Pins the reporter to the dispatcher that is current on this thread.
    pub fn with_current_dispatch(self) -> Self {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        self.with_dispatch(dispatch)
    }

    /// Pins the reporter to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Sets whether events carry the rendered trace.
    pub fn include_trace(mut self, include_trace: bool) -> Self {
        self.include_trace = include_trace;
        self
    }

    /// Installs this reporter as the process-wide reporter, returning the
    /// previous one.
    pub fn install(self) -> Option<Arc<dyn Reporter>> {
        strandguard::install_reporter(self)
    }

    fn emit(&self, fault: &Fault, trace: &Trace) {
        if self.include_trace {
            tracing::error!(fault = %fault, trace = %trace, "fault in guarded strand");
        } else {
            tracing::error!(fault = %fault, "fault in guarded strand");
        }
    }
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for TracingReporter {
    fn report(&self, fault: &Fault, trace: &Trace) {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || self.emit(fault, trace)),
            None => self.emit(fault, trace),
        }
    }
}
