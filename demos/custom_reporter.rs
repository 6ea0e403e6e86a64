//! Installing and swapping process-wide reporters.
//!
//! Run with `cargo run --example custom_reporter`.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use strandguard::{Fault, Reporter, trace::Trace};

/// Prints faults behind a prefix, without the trace.
struct PrefixReporter {
    prefix: String,
}

impl Reporter for PrefixReporter {
    fn report(&self, fault: &Fault, _trace: &Trace) {
        eprintln!("{} ERROR: {fault}", self.prefix);
    }
}

/// Counts faults by payload kind.
#[derive(Default)]
struct CountingReporter {
    by_kind: Mutex<BTreeMap<&'static str, usize>>,
}

impl CountingReporter {
    fn snapshot(&self) -> BTreeMap<&'static str, usize> {
        self.by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Reporter for CountingReporter {
    fn report(&self, fault: &Fault, _trace: &Trace) {
        let kind = if fault.message().is_some() {
            "message"
        } else if fault.is::<i32>() {
            "i32"
        } else {
            "other"
        };
        *self
            .by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default() += 1;
    }
}

fn pause() {
    thread::sleep(Duration::from_millis(100));
}

fn main() {
    println!("=== strandguard custom reporters ===");

    println!("\n1. Prefixed reporter:");
    strandguard::install_reporter(PrefixReporter {
        prefix: "[CUSTOM]".to_string(),
    });
    strandguard::launch(|| panic!("logged with a prefix"));
    pause();

    println!("\n2. Counting reporter:");
    let counter = Arc::new(CountingReporter::default());
    strandguard::set_reporter(Some(counter.clone()));
    strandguard::launch(|| panic!("string panic"));
    strandguard::launch(|| std::panic::panic_any(123_i32));
    strandguard::launch(|| std::panic::panic_any(vec!["slice", "panic"]));
    pause();
    println!("   faults by kind: {:?}", counter.snapshot());

    println!("\n3. Swapping reporters:");
    strandguard::install_reporter(PrefixReporter {
        prefix: "[REPORTER-1]".to_string(),
    });
    strandguard::launch(|| panic!("seen by reporter 1"));
    pause();
    strandguard::install_reporter(PrefixReporter {
        prefix: "[REPORTER-2]".to_string(),
    });
    strandguard::launch(|| panic!("seen by reporter 2"));
    pause();

    println!("\n4. No reporter at all:");
    strandguard::clear_reporter();
    strandguard::launch(|| panic!("silently discarded"));
    pause();

    strandguard::reset_reporter();
    println!("\n=== done ===");
}
