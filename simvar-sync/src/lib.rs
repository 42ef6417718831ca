//! Simulation Variable Sync Library
//!
//! Keeps a set of named simulation variables in sync with a running
//! simulator session: registers their definitions, polls them on a fixed
//! cadence and applies the responses as they arrive.
//!
//! # Architecture
//!
//! The engine is a small pipeline around one poll loop:
//! - `VariableRegistry` tracks variables, their request state and last values
//! - `DispatchClassifier` turns raw session records into typed messages
//! - `ValueCodec` decodes value payloads according to each variable's declared type
//! - `Scheduler` drives registration, requests and draining over a `Session`,
//!   and writes values back to the user object on demand
//!
//! The library does NOT:
//! - Bind the simulator's client library (that is the CLI's `NativeSession`)
//! - Persist values
//!
//! # Example Usage
//!
//! ```no_run
//! use simvar_sync::{
//!     stop_signal, CallbackListener, DataType, LoopbackSession, Scheduler, SyncConfig,
//!     VariableRegistry,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> simvar_sync::Result<()> {
//! let config = SyncConfig::new()
//!     .add_variable("AIRSPEED INDICATED", "knot", DataType::Float64)
//!     .add_variable("TITLE", "", DataType::String256);
//!
//! let registry = Arc::new(VariableRegistry::new());
//! let listener = CallbackListener::new().with_data_update(|id| println!("updated {}", id));
//!
//! let mut scheduler = Scheduler::new(LoopbackSession::new(), Arc::clone(&registry), config)?
//!     .with_listener(listener);
//! scheduler.open("demo")?;
//!
//! let (handle, signal) = stop_signal();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     handle.stop();
//! });
//!
//! scheduler.run(signal).await?;
//! for line in registry.dump("  ") {
//!     println!("{}", line);
//! }
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod ids;
pub mod listener;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use codec::ValueCodec;
pub use config::{ReissuePolicy, SyncConfig, VariableSpec, MAX_PENDING_TIMEOUT_MS};
pub use dispatch::{
    Dispatch, DispatchClassifier, DispatchEnvelope, DispatchMessage, EventRecord,
    ExceptionRecord, MessageKind, ObjectDataRecord, OpenRecord, VersionPair,
};
pub use ids::{IdGenerator, SequentialIds};
pub use listener::{CallbackListener, SyncListener};
pub use registry::{TrackedVariable, VariableDefinition, VariableRegistry};
pub use scheduler::{
    stop_signal, DrainOutcome, LoopExit, LoopState, RequestTickReport, Scheduler, StopHandle,
    StopSignal,
};
pub use session::{LoopbackSession, Session, ValueSource};
pub use types::{
    DataType, DefineId, FixedString, RequestId, Result, SessionError, SyncError, Timestamp,
    Value,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty registry behind a scheduler
        let registry = std::sync::Arc::new(VariableRegistry::new());
        let scheduler = Scheduler::new(LoopbackSession::new(), registry, SyncConfig::new()).unwrap();
        assert_eq!(scheduler.state(), LoopState::Running);
        assert!(scheduler.registry().is_empty());
    }
}
