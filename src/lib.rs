#![deny(
    missing_docs,
    unsafe_code,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Fire-and-forget task launching where a panic inside the task can never
//! take the process down.
//!
//! ## Overview
//!
//! Each launch runs a closure on its own detached thread (a *strand*) inside
//! a fault-interception boundary. If the closure panics, the panic is caught
//! at the top of the strand and handed to exactly one place:
//!
//! - [`launch`] reports it to the process-wide [`Reporter`], together with a
//!   [`Trace`](trace::Trace) of the stack captured where the task panicked.
//! - [`launch_with_handler`] passes it to a handler supplied by the caller.
//!
//! A task that finishes normally is never reported. There is no handle to
//! join, no result and no way to cancel: once launched, a task is on its own.
//!
//! ## Quick Example
//!
//! ```
//! use strandguard::{Fault, trace::Trace};
//!
//! // Faults go to stderr until another reporter is installed.
//! strandguard::install_reporter(|fault: &Fault, trace: &Trace| {
//!     eprintln!("background job failed: {fault}\n{trace}");
//! });
//!
//! strandguard::launch(|| {
//!     let jobs: Vec<u32> = Vec::new();
//!     let _first = jobs[0];
//! });
//!
//! strandguard::launch_with_handler(
//!     Some(|| panic!("flush failed")),
//!     Some(|fault: Fault| eprintln!("flusher died: {fault}")),
//! );
//! ```
//!
//! ## Reporters
//!
//! The process-wide reporter starts out as [`StderrReporter`]. It can be
//! swapped at any time with [`set_reporter`], [`install_reporter`],
//! [`clear_reporter`] and [`reset_reporter`], and read with [`reporter()`].
//! Faults are routed to whichever reporter is installed when they are caught.
//! With no reporter installed, faults on the default path are discarded.
//!
//! Applications that prefer not to rely on global state can build a
//! [`Launcher`] with its own reporter instead.
//!
//! ## Ecosystem
//!
//! - **`strandguard-tracing`** - a reporter that emits faults as structured
//!   `tracing` events.

pub mod fault;
mod launcher;
mod panic_hook;
pub mod prelude;
pub mod registry;
pub mod reporter;
pub mod trace;

pub use self::{
    fault::Fault,
    launcher::{
        LaunchError, Launcher, launch, launch_with_handler, try_launch, try_launch_with_handler,
    },
    registry::{clear_reporter, install_reporter, reporter, reset_reporter, set_reporter},
    reporter::{Reporter, StderrReporter},
};
