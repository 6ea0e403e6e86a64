//! Launching tasks that panic, with and without a custom handler.
//!
//! Run with `cargo run --example basic`.

use std::{thread, time::Duration};

use strandguard::Fault;

fn main() {
    println!("=== strandguard basic usage ===");

    println!("\n1. A panicking task, reported to stderr:");
    strandguard::launch(|| {
        println!("   task starting...");
        panic!("this panic is caught on the strand");
    });
    thread::sleep(Duration::from_millis(100));

    println!("\n2. A panicking task with its own handler:");
    strandguard::launch_with_handler(
        Some(|| {
            println!("   another task starting...");
            panic!("custom recovery example");
        }),
        Some(|fault: Fault| println!("   handler caught: {fault}")),
    );
    thread::sleep(Duration::from_millis(100));

    println!("\n3. A task that completes normally:");
    strandguard::launch(|| println!("   nothing to report here"));
    thread::sleep(Duration::from_millis(100));

    println!("\n4. Several tasks at once:");
    for id in 0..5 {
        strandguard::launch(move || {
            if id % 2 == 0 {
                println!("   task {id}: normal execution");
            } else {
                println!("   task {id}: about to panic...");
                panic!("panic from task {id}");
            }
        });
    }
    thread::sleep(Duration::from_millis(200));

    println!("\n=== all tasks launched, main thread still running ===");
}
