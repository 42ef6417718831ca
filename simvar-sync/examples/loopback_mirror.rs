//! Loopback mirror
//!
//! Runs the poll loop against the in-memory loopback session and prints the
//! registry after every batch. Useful for watching the scheduler without a
//! simulator.
//!
//! Usage:
//!   loopback_mirror [seconds]
//!
//! Example:
//!   RUST_LOG=debug loopback_mirror 3

use simvar_sync::{
    stop_signal, CallbackListener, DataType, LoopbackSession, Scheduler, SyncConfig,
    VariableRegistry,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> simvar_sync::Result<()> {
    env_logger::init();

    let seconds: u64 = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(2);

    let config = SyncConfig::new()
        .add_variable("AIRSPEED INDICATED", "knot", DataType::Float64)
        .add_variable("PLANE HEADING DEGREES MAGNETIC", "degrees", DataType::Float64)
        .add_variable("TITLE", "", DataType::String256)
        .add_variable("ATC ID", "", DataType::String64);

    let registry = Arc::new(VariableRegistry::new());
    let printed = Arc::clone(&registry);
    let listener = CallbackListener::new()
        .with_open(|open| println!("Connected to {} {}", open.app_name, open.app_version))
        .with_batch_ready(move || {
            println!("--- batch ({} updates) ---", printed.total_updates());
            for line in printed.dump("  ") {
                println!("{}", line);
            }
        });

    let mut scheduler = Scheduler::new(LoopbackSession::new(), Arc::clone(&registry), config)?
        .with_listener(listener);
    scheduler.open("Loopback Mirror")?;

    let (handle, signal) = stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        handle.stop();
    });

    let exit = scheduler.run(signal).await?;
    scheduler.close()?;

    println!("\n=== SUMMARY ===");
    println!("Loop exit: {:?}", exit);
    println!("Variables tracked: {}", registry.len());
    println!("Total updates: {}", registry.total_updates());
    Ok(())
}
