//! Launching tasks on their own strand behind a fault-interception boundary.
//!
//! Every launch spawns one detached thread. The task runs inside
//! [`catch_unwind`](std::panic::catch_unwind); a panic anywhere in its body is
//! caught at the top of the strand and turned into a [`Fault`], which is then
//! handed to exactly one place:
//!
//! - [`launch`] resolves the process-wide [`reporter`](fn@crate::reporter) at the
//!   moment of the fault and reports it with the [`Trace`] captured where the
//!   task panicked. With no reporter installed the fault is discarded.
//! - [`launch_with_handler`] passes the fault to the caller's handler and
//!   never looks at the registry. No trace is captured on this path.
//! - [`Launcher`] carries the same operations with explicit configuration: an
//!   injected reporter, a thread name, a stack size or a trace filter.
//!
//! Launching never blocks the caller and hands back nothing to wait on.
//!
//! # Panic output
//!
//! The first launch chains a hook in front of the current panic hook to
//! capture traces at the panic site. The previous hook still runs, so the
//! usual `thread '...' panicked at ...` line is still printed unless the
//! application installs its own hook. A hook installed after the first launch
//! replaces the capturing one; traces are then taken at the interception
//! point and no longer show the panicking frames. Builds with
//! `panic = "abort"` cannot be intercepted at all.

use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use crate::{
    fault::Fault,
    panic_hook, registry,
    reporter::Reporter,
    trace::{Trace, TraceFilter},
};

/// Error returned by the `try_` launch operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The operating system refused to create the strand.
    #[error("failed to spawn a guarded strand")]
    Spawn(#[source] io::Error),
    /// The configured thread name contains a NUL byte.
    #[error("thread name {0:?} contains a NUL byte")]
    InvalidName(String),
}

/// Where faults go on the default launch path.
#[derive(Clone)]
enum FaultSink {
    Registry,
    Reporter(Arc<dyn Reporter>),
    Discard,
}

impl FaultSink {
    fn resolve(&self) -> Option<Arc<dyn Reporter>> {
        match self {
            FaultSink::Registry => registry::reporter(),
            FaultSink::Reporter(reporter) => Some(Arc::clone(reporter)),
            FaultSink::Discard => None,
        }
    }
}

/// Launch configuration.
///
/// The free functions [`launch`] and [`launch_with_handler`] use
/// `Launcher::new()`. Build your own to inject a reporter instead of relying
/// on the process-wide one, or to configure the spawned threads.
///
/// # Examples
///
/// ```rust
/// use std::sync::mpsc;
///
/// use strandguard::{Fault, Launcher, trace::Trace};
///
/// let (tx, rx) = mpsc::channel();
/// let launcher = Launcher::with_reporter(move |fault: &Fault, _: &Trace| {
///     let _ = tx.send(fault.to_string());
/// })
/// .name("ingest");
///
/// launcher.launch(|| panic!("bad record"));
/// assert_eq!(rx.recv().unwrap(), "bad record");
/// ```
#[derive(Clone)]
pub struct Launcher {
    sink: FaultSink,
    name: Option<String>,
    stack_size: Option<usize>,
    trace_filter: Option<TraceFilter>,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match self.sink {
            FaultSink::Registry => "registry",
            FaultSink::Reporter(_) => "reporter",
            FaultSink::Discard => "discard",
        };
        f.debug_struct("Launcher")
            .field("sink", &sink)
            .field("name", &self.name)
            .field("stack_size", &self.stack_size)
            .field("trace_filter", &self.trace_filter)
            .finish()
    }
}

impl Launcher {
    /// A launcher that reports faults to the process-wide reporter.
    pub const fn new() -> Self {
        Self::with_sink(FaultSink::Registry)
    }

    /// A launcher that reports faults to `reporter` and never consults the
    /// process-wide one.
    pub fn with_reporter<R: Reporter>(reporter: R) -> Self {
        Self::with_shared_reporter(Arc::new(reporter))
    }

    /// Like [`with_reporter`](Self::with_reporter), for a reporter that is
    /// already shared.
    pub fn with_shared_reporter(reporter: Arc<dyn Reporter>) -> Self {
        Self::with_sink(FaultSink::Reporter(reporter))
    }

    /// A launcher that intercepts faults and drops them.
    pub const fn discarding() -> Self {
        Self::with_sink(FaultSink::Discard)
    }

    const fn with_sink(sink: FaultSink) -> Self {
        Self {
            sink,
            name: None,
            stack_size: None,
            trace_filter: None,
        }
    }

    /// Names the spawned threads.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the stack size, in bytes, of the spawned threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Overrides the trace filter, which otherwise comes from
    /// [`TraceFilter::from_env`].
    pub fn trace_filter(mut self, filter: TraceFilter) -> Self {
        self.trace_filter = Some(filter);
        self
    }

    /// Runs `task` on a new strand, reporting a panic to this launcher's
    /// reporter.
    ///
    /// A strand that cannot be spawned is logged and the task dropped; use
    /// [`try_launch`](Self::try_launch) to observe that.
    pub fn launch<T>(&self, task: T)
    where
        T: FnOnce() + Send + 'static,
    {
        if let Err(error) = self.try_launch(task) {
            log_launch_failure(&error);
        }
    }

    /// Like [`launch`](Self::launch), but returns an error if the strand
    /// could not be spawned.
    pub fn try_launch<T>(&self, task: T) -> Result<(), LaunchError>
    where
        T: FnOnce() + Send + 'static,
    {
        let sink = self.sink.clone();
        let filter = self.trace_filter.unwrap_or_else(TraceFilter::from_env);
        let capture = !filter.disabled && !matches!(sink, FaultSink::Discard);
        if capture {
            panic_hook::install();
        }
        self.spawn(move || {
            if capture {
                panic_hook::arm(filter);
            }
            guard(task, move |fault| {
                let captured = panic_hook::disarm();
                report_fault(&sink, &filter, fault, captured);
            });
            panic_hook::disarm();
        })
    }

    /// Runs `task` on a new strand, passing a panic to `handler`.
    ///
    /// A `None` task launches nothing. A `None` handler means a panic is
    /// intercepted and dropped.
    pub fn launch_with_handler<T, H>(&self, task: Option<T>, handler: Option<H>)
    where
        T: FnOnce() + Send + 'static,
        H: FnOnce(Fault) + Send + 'static,
    {
        if let Err(error) = self.try_launch_with_handler(task, handler) {
            log_launch_failure(&error);
        }
    }

    /// Like [`launch_with_handler`](Self::launch_with_handler), but returns
    /// an error if the strand could not be spawned.
    pub fn try_launch_with_handler<T, H>(
        &self,
        task: Option<T>,
        handler: Option<H>,
    ) -> Result<(), LaunchError>
    where
        T: FnOnce() + Send + 'static,
        H: FnOnce(Fault) + Send + 'static,
    {
        let Some(task) = task else {
            return Ok(());
        };
        self.spawn(move || {
            guard(task, move |fault| match handler {
                Some(handler) => handler(fault),
                None => tracing::trace!(%fault, "no fault handler; discarding fault"),
            })
        })
    }

    fn spawn<F>(&self, body: F) -> Result<(), LaunchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            if name.contains('\0') {
                return Err(LaunchError::InvalidName(name.clone()));
            }
            builder = builder.name(name.clone());
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        // The join handle is dropped, detaching the strand.
        builder.spawn(body).map(drop).map_err(LaunchError::Spawn)
    }
}

/// Runs `task` and hands a panic, if any, to `on_fault`.
///
/// `on_fault` is itself guarded: a panic raised while handling the fault is
/// logged and dropped.
fn guard<T, F>(task: T, on_fault: F)
where
    T: FnOnce(),
    F: FnOnce(Fault),
{
    let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) else {
        return;
    };
    let fault = Fault::from_payload(payload);
    if let Err(secondary) = panic::catch_unwind(AssertUnwindSafe(move || on_fault(fault))) {
        let secondary = Fault::from_payload(secondary);
        tracing::error!(panic = %secondary, "fault handler panicked; fault dropped");
    }
}

/// Hands `fault` to the sink's reporter. Without a trace from the panic site,
/// one is captured here instead.
fn report_fault(sink: &FaultSink, filter: &TraceFilter, fault: Fault, captured: Option<Trace>) {
    let Some(reporter) = sink.resolve() else {
        tracing::trace!(%fault, "no fault reporter installed; discarding fault");
        return;
    };
    let trace = captured.unwrap_or_else(|| Trace::capture(filter));
    reporter.report(&fault, &trace);
}

fn log_launch_failure(error: &LaunchError) {
    tracing::error!(
        error = %error,
        source = ?std::error::Error::source(error),
        "failed to launch guarded task"
    );
}

/// Runs `task` on a new strand, reporting a panic to the process-wide
/// reporter.
///
/// # Examples
///
/// ```rust
/// strandguard::launch(|| {
///     let config: Option<&str> = None;
///     let _ = config.expect("config was loaded");
/// });
/// // The caller carries on; the panic is reported on the strand.
/// ```
pub fn launch<T>(task: T)
where
    T: FnOnce() + Send + 'static,
{
    Launcher::new().launch(task)
}

/// Like [`launch`], but returns an error if the strand could not be spawned.
pub fn try_launch<T>(task: T) -> Result<(), LaunchError>
where
    T: FnOnce() + Send + 'static,
{
    Launcher::new().try_launch(task)
}

/// Runs `task` on a new strand, passing a panic to `handler` instead of the
/// process-wide reporter.
///
/// A `None` task launches nothing. A `None` handler means a panic is
/// intercepted and dropped.
///
/// # Examples
///
/// ```rust
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// strandguard::launch_with_handler(
///     Some(|| panic!("lost connection")),
///     Some(move |fault: strandguard::Fault| {
///         let _ = tx.send(fault.to_string());
///     }),
/// );
/// assert_eq!(rx.recv().unwrap(), "lost connection");
/// ```
pub fn launch_with_handler<T, H>(task: Option<T>, handler: Option<H>)
where
    T: FnOnce() + Send + 'static,
    H: FnOnce(Fault) + Send + 'static,
{
    Launcher::new().launch_with_handler(task, handler)
}

/// Like [`launch_with_handler`], but returns an error if the strand could not
/// be spawned.
pub fn try_launch_with_handler<T, H>(task: Option<T>, handler: Option<H>) -> Result<(), LaunchError>
where
    T: FnOnce() + Send + 'static,
    H: FnOnce(Fault) + Send + 'static,
{
    Launcher::new().try_launch_with_handler(task, handler)
}
