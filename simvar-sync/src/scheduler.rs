//! Poll scheduler
//!
//! One loop multiplexes three things: the request cadence, the drain cadence
//! and a stop signal. Each request tick reports a finished batch, registers
//! whatever the session has not accepted yet and issues requests for idle
//! variables. Each drain tick takes at most one record from the session and
//! routes it.
//!
//! The tick methods are public so embedders (and tests) can drive the
//! scheduler by hand; `run` is the timer-driven loop on top of them.

use crate::codec::ValueCodec;
use crate::config::SyncConfig;
use crate::dispatch::{Dispatch, DispatchClassifier, MessageKind, ObjectDataRecord};
use crate::ids::{IdGenerator, SequentialIds};
use crate::listener::SyncListener;
use crate::registry::VariableRegistry;
use crate::session::Session;
use crate::types::{DataType, DefineId, Result, SyncError, Value};
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Lifecycle of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// A stop was requested or the host quit; the current iteration finishes
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Running => write!(f, "running"),
            LoopState::Stopping => write!(f, "stopping"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why `run` returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop signal fired
    Stopped,
    /// The host sent a Quit record
    Quit,
}

/// What one request tick did
#[derive(Debug, Default)]
pub struct RequestTickReport {
    /// The batch-ready notification fired
    pub batch_ready: bool,
    /// Definitions the session accepted this tick
    pub registered: usize,
    /// Requests issued this tick
    pub requested: usize,
    /// The registration that ended reconciliation early, if any
    pub registration_failure: Option<SyncError>,
}

/// What one drain tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was waiting
    Empty,
    /// A record was routed to the listener
    Handled(MessageKind),
    /// A data response was accepted
    Updated { define_id: DefineId },
    /// A data response was stale, duplicate or for an unknown define id
    Discarded { define_id: DefineId },
    /// A data response matched but its payload produced no value
    NoValue { define_id: DefineId },
    /// A record kind without a route
    Ignored(MessageKind),
    /// The record failed validation
    Malformed,
    /// The host quit; the loop ends
    Quit,
}

/// Create a connected stop handle and signal
///
/// Dropping every `StopHandle` counts as a stop.
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Requests the poll loop to stop; cloneable across tasks and threads
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the poll loop once per iteration
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once a stop was requested or every handle is gone
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Drives one session against one registry
pub struct Scheduler<S: Session> {
    session: S,
    registry: Arc<VariableRegistry>,
    listener: Box<dyn SyncListener>,
    request_ids: Box<dyn IdGenerator>,
    config: SyncConfig,
    state: LoopState,
    updates_seen: u64,
}

impl<S: Session> Scheduler<S> {
    /// Create a scheduler and track the configured initial variables
    pub fn new(session: S, registry: Arc<VariableRegistry>, config: SyncConfig) -> Result<Self> {
        config.validate()?;

        for spec in &config.variables {
            registry.add(&spec.name, &spec.unit, spec.data_type)?;
        }

        let updates_seen = registry.total_updates();
        Ok(Self {
            session,
            registry,
            listener: Box::new(()),
            request_ids: Box::new(SequentialIds::new()),
            config,
            state: LoopState::Running,
            updates_seen,
        })
    }

    /// Builder method: set the listener
    pub fn with_listener(mut self, listener: impl SyncListener + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    /// Builder method: replace the request id generator
    pub fn with_request_ids(mut self, request_ids: Box<dyn IdGenerator>) -> Self {
        self.request_ids = request_ids;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Open the session under the given client name
    pub fn open(&mut self, name: &str) -> Result<()> {
        self.session.open(name)?;
        info!("Session opened as '{}'", name);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.session.close()?;
        info!("Session closed");
        Ok(())
    }

    /// Request cadence work
    ///
    /// Runs batch notification, then registration reconciliation, then
    /// request issue. A refused registration ends reconciliation for this
    /// tick but requests are still issued for variables already registered.
    /// Pending ages are measured on the tokio clock.
    pub fn request_tick(&mut self) -> RequestTickReport {
        let now = Instant::now();
        let mut report = RequestTickReport::default();
        if self.state == LoopState::Stopped {
            return report;
        }

        let total = self.registry.total_updates();
        if total != self.updates_seen {
            self.updates_seen = total;
            self.listener.on_batch_ready();
            report.batch_ready = true;
        }

        for definition in self.registry.unregistered() {
            match self.session.register_variable(
                definition.id,
                &definition.name,
                &definition.unit,
                definition.data_type,
            ) {
                Ok(()) => {
                    if self.registry.mark_registered(definition.id) {
                        debug!(
                            "Registered '{}' ({}, {}) as define id {}",
                            definition.name, definition.unit, definition.data_type, definition.id
                        );
                        report.registered += 1;
                    }
                }
                Err(e) => {
                    warn!("Registration of '{}' failed: {}", definition.name, e);
                    let failure = SyncError::RegistrationFailure {
                        define_id: definition.id,
                        source: e,
                    };
                    self.listener.on_registration_failure(definition.id, &failure);
                    report.registration_failure = Some(failure);
                    break;
                }
            }
        }

        for define_id in self.registry.due_for_request(now, self.config.reissue.timeout()) {
            let Some(request_id) = self.request_ids.next_id() else {
                error!("Request ids exhausted, define id {} not requested", define_id);
                break;
            };
            match self.session.request_variable(request_id, define_id) {
                Ok(()) => {
                    if self.registry.mark_pending(define_id, request_id, now) {
                        debug!("Requested define id {} as request {}", define_id, request_id);
                        report.requested += 1;
                    }
                }
                Err(e) => warn!("Request for define id {} failed: {}", define_id, e),
            }
        }

        report
    }

    /// Write a value to a variable on the user object
    ///
    /// The variable is tracked and registered first when needed; `unit` and
    /// `data_type` only matter for a variable not tracked yet. The value is
    /// converted to the declared type before it is sent. The registry keeps
    /// its value until the next data response reports the written one.
    pub fn set_variable(
        &mut self,
        name: &str,
        unit: &str,
        data_type: DataType,
        value: &Value,
    ) -> Result<DefineId> {
        let define_id = self.registry.add(name, unit, data_type)?;
        // Another thread may remove the variable between the two calls
        let Some(variable) = self.registry.lookup(define_id) else {
            return Err(SyncError::UnknownVariable(name.to_string()));
        };
        let definition = variable.definition;

        let payload = ValueCodec::encode_as(definition.data_type, value).ok_or_else(|| {
            SyncError::ValueTypeMismatch {
                name: name.to_string(),
                data_type: definition.data_type,
                value: value.clone(),
            }
        })?;

        if !definition.registered {
            self.session
                .register_variable(define_id, &definition.name, &definition.unit, definition.data_type)
                .map_err(|source| SyncError::RegistrationFailure { define_id, source })?;
            self.registry.mark_registered(define_id);
        }

        self.session.set_variable(define_id, &payload)?;
        debug!("Wrote {} to '{}' (define id {})", value, name, define_id);
        Ok(define_id)
    }

    /// Drain cadence work: take and route at most one record
    ///
    /// A failing dispatch source is fatal: the scheduler moves to `Stopped`
    /// and the error is returned. Everything else is reported as an outcome.
    pub fn drain_tick(&mut self) -> Result<DrainOutcome> {
        if self.state == LoopState::Stopped {
            return Ok(DrainOutcome::Empty);
        }

        let bytes = match self.session.poll_next() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(DrainOutcome::Empty),
            Err(e) => {
                error!("Dispatch source failed: {}", e);
                self.state = LoopState::Stopped;
                return Err(SyncError::DispatchFailure(e));
            }
        };

        let message = match DispatchClassifier::parse(&bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping record: {}", e);
                return Ok(DrainOutcome::Malformed);
            }
        };

        let kind = message.envelope.kind;
        trace!("Drained {} record ({} bytes)", kind, message.envelope.size);

        let outcome = match message.body {
            Dispatch::Opened(open) => {
                info!(
                    "Connected to {} {} (build {}), session {} (build {})",
                    open.app_name,
                    open.app_version,
                    open.app_build,
                    open.session_version,
                    open.session_build
                );
                self.listener.on_open(&open);
                DrainOutcome::Handled(kind)
            }
            Dispatch::Quit => {
                info!("Host quit");
                self.listener.on_quit();
                self.state = LoopState::Stopping;
                DrainOutcome::Quit
            }
            Dispatch::Exception(exception) => {
                debug!(
                    "Exception {} (send id {}, index {})",
                    exception.code, exception.send_id, exception.index
                );
                self.listener.on_exception(exception.code);
                DrainOutcome::Handled(kind)
            }
            Dispatch::Event(event) => {
                self.listener.on_event(event.event_id);
                DrainOutcome::Handled(kind)
            }
            Dispatch::ObjectData(record) | Dispatch::ObjectDataByType(record) => {
                self.listener.on_object_data(kind, &record);
                self.apply(&record)
            }
            Dispatch::Unknown(kind) => {
                debug!("Ignoring {} record", kind);
                DrainOutcome::Ignored(kind)
            }
        };

        Ok(outcome)
    }

    fn apply(&mut self, record: &ObjectDataRecord) -> DrainOutcome {
        let define_id = record.define_id;

        let Some(data_type) = self.registry.data_type(define_id) else {
            warn!(
                "Discarding response for unknown define id {} (request {})",
                define_id, record.request_id
            );
            return DrainOutcome::Discarded { define_id };
        };

        let Some(value) = ValueCodec::decode(data_type, &record.payload) else {
            return DrainOutcome::NoValue { define_id };
        };

        match self.registry.update(record.request_id, define_id, value) {
            Some(_) => {
                self.listener.on_data_update(define_id);
                DrainOutcome::Updated { define_id }
            }
            None => DrainOutcome::Discarded { define_id },
        }
    }

    /// Run the timer-driven loop until stopped, the host quits or the
    /// dispatch source fails
    ///
    /// Both intervals fire immediately on entry, request tick first. The stop
    /// signal is checked before any tick, so once it fires no further session
    /// calls are made.
    pub async fn run(&mut self, mut stop: StopSignal) -> Result<LoopExit> {
        info!(
            "Poll loop starting: request every {:?}, drain every {:?}, {} variable(s)",
            self.config.request_interval(),
            self.config.drain_interval(),
            self.registry.len()
        );

        let mut request_timer = interval(self.config.request_interval());
        request_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drain_timer = interval(self.config.drain_interval());
        drain_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state = LoopState::Running;
        let exit = loop {
            if stop.is_stopped() {
                self.state = LoopState::Stopping;
                break LoopExit::Stopped;
            }

            tokio::select! {
                biased;

                _ = stop.wait() => {
                    self.state = LoopState::Stopping;
                    break LoopExit::Stopped;
                }

                _ = request_timer.tick() => {
                    self.request_tick();
                }

                _ = drain_timer.tick() => {
                    if self.drain_tick()? == DrainOutcome::Quit {
                        break LoopExit::Quit;
                    }
                }
            }
        };

        self.state = LoopState::Stopped;
        info!("Poll loop stopped ({:?})", exit);
        Ok(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchMessage, ExceptionRecord};
    use crate::session::LoopbackSession;
    use crate::types::{DataType, Value};

    fn scheduler() -> Scheduler<LoopbackSession> {
        let config = SyncConfig::new().add_variable("PLANE ALTITUDE", "feet", DataType::Int32);
        let mut scheduler = Scheduler::new(
            LoopbackSession::with_source(|_: &str, _: DataType| Some(Value::Int32(1200))),
            Arc::new(VariableRegistry::new()),
            config,
        )
        .unwrap();
        scheduler.open("test").unwrap();
        scheduler
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = Scheduler::new(
            LoopbackSession::new(),
            Arc::new(VariableRegistry::new()),
            SyncConfig::new().with_drain_interval(std::time::Duration::ZERO),
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_request_then_drain_updates_value() {
        let mut scheduler = scheduler();
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Handled(MessageKind::Open));

        let report = scheduler.request_tick();
        assert_eq!(report.registered, 1);
        assert_eq!(report.requested, 1);
        assert!(!report.batch_ready);

        let id = scheduler.registry().lookup_by_name("PLANE ALTITUDE").unwrap().id();
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Updated { define_id: id });
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Empty);
        assert_eq!(scheduler.registry().value(id), Some(Value::Int32(1200)));

        assert!(scheduler.request_tick().batch_ready);
        assert!(!scheduler.request_tick().batch_ready);
    }

    #[test]
    fn test_malformed_and_unknown_records_are_not_fatal() {
        let mut scheduler = scheduler();
        scheduler.drain_tick().unwrap();

        scheduler.session_mut().push_raw(vec![1, 2, 3]);
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Malformed);

        let unknown = DispatchMessage::new(Dispatch::Unknown(MessageKind::Unknown(99))).encode();
        scheduler.session_mut().push_raw(unknown);
        assert_eq!(
            scheduler.drain_tick().unwrap(),
            DrainOutcome::Ignored(MessageKind::Unknown(99))
        );
        assert_eq!(scheduler.state(), LoopState::Running);
    }

    #[test]
    fn test_quit_moves_to_stopping() {
        let mut scheduler = scheduler();
        scheduler.drain_tick().unwrap();
        scheduler.session_mut().quit();
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Quit);
        assert_eq!(scheduler.state(), LoopState::Stopping);
    }

    #[test]
    fn test_exception_leaves_registry_alone() {
        let mut scheduler = scheduler();
        scheduler.drain_tick().unwrap();
        scheduler.session_mut().push_record(Dispatch::Exception(ExceptionRecord {
            code: 7,
            send_id: 0,
            index: 0,
        }));

        assert_eq!(
            scheduler.drain_tick().unwrap(),
            DrainOutcome::Handled(MessageKind::Exception)
        );
        assert_eq!(scheduler.registry().total_updates(), 0);
    }

    #[test]
    fn test_dispatch_failure_stops_scheduler() {
        let mut scheduler = scheduler();
        scheduler.session_mut().close().unwrap();

        assert!(matches!(scheduler.drain_tick(), Err(SyncError::DispatchFailure(_))));
        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Empty);
        assert_eq!(scheduler.request_tick().requested, 0);
    }

    #[test]
    fn test_stop_signal() {
        let (handle, signal) = stop_signal();
        assert!(!signal.is_stopped());
        handle.clone().stop();
        assert!(signal.is_stopped());

        let (handle, signal) = stop_signal();
        drop(handle);
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_set_variable_reaches_session() {
        let mut scheduler = scheduler();
        scheduler.drain_tick().unwrap();

        let id = scheduler
            .set_variable("PLANE ALTITUDE", "feet", DataType::Int32, &Value::Float64(3500.0))
            .unwrap();
        assert!(scheduler.registry().lookup(id).unwrap().definition.registered);
        assert_eq!(scheduler.registry().value(id), None);

        scheduler.request_tick();
        assert_eq!(scheduler.drain_tick().unwrap(), DrainOutcome::Updated { define_id: id });
        assert_eq!(scheduler.registry().value(id), Some(Value::Int32(3500)));
    }

    #[test]
    fn test_set_variable_tracks_new_variable() {
        let mut scheduler = scheduler();
        scheduler.drain_tick().unwrap();

        let id = scheduler
            .set_variable("GENERAL ENG THROTTLE LEVER POSITION:1", "percent", DataType::Float64, &Value::Int32(80))
            .unwrap();
        assert_eq!(scheduler.session().queued(), 0);
        let variable = scheduler.registry().lookup(id).unwrap();
        assert_eq!(variable.definition.data_type, DataType::Float64);
        assert!(variable.definition.registered);
        assert_eq!(scheduler.registry().len(), 2);
    }

    #[test]
    fn test_set_variable_rejects_incompatible_value() {
        let mut scheduler = scheduler();
        let text = Value::VariableString("high".to_string());
        let result = scheduler.set_variable("PLANE ALTITUDE", "feet", DataType::Int32, &text);
        assert!(matches!(
            result,
            Err(SyncError::ValueTypeMismatch { data_type: DataType::Int32, .. })
        ));
    }

    #[test]
    fn test_request_ids_exhausted_stops_issuing() {
        let mut scheduler = scheduler().with_request_ids(Box::new(SequentialIds::starting_at(u32::MAX)));
        scheduler.drain_tick().unwrap();
        scheduler
            .registry()
            .add("PLANE LATITUDE", "degrees", DataType::Float64)
            .unwrap();

        let report = scheduler.request_tick();
        assert_eq!(report.registered, 2);
        assert_eq!(report.requested, 1);

        let pending: Vec<_> = scheduler.registry().snapshot().iter().map(|v| v.pending_request).collect();
        assert_eq!(pending, vec![Some(u32::MAX), None]);
    }
}
