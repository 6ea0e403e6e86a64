//! Commonly used items for convenient importing.
//!
//! ```rust
//! use strandguard::prelude::*;
//!
//! let launcher = Launcher::with_reporter(|fault: &Fault, trace: &Trace| {
//!     eprintln!("{fault}\n{trace}");
//! });
//! launcher.launch(|| {});
//! ```

pub use crate::{
    Fault, LaunchError, Launcher, Reporter, launch, launch_with_handler, trace::Trace,
};
