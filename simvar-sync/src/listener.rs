//! Listener contract
//!
//! The scheduler reports everything it observes through `SyncListener`. All
//! methods default to no-ops, so an implementor overrides only what it needs.
//! `CallbackListener` covers the other common style: a set of optional
//! closures assembled at the call site.

use crate::dispatch::{MessageKind, ObjectDataRecord, OpenRecord};
use crate::types::{DefineId, SyncError};

/// Receiver of session and synchronization notifications
pub trait SyncListener: Send {
    /// The session reported itself open
    fn on_open(&mut self, _open: &OpenRecord) {}

    /// The host is shutting the session down; the poll loop ends after this
    fn on_quit(&mut self) {}

    fn on_exception(&mut self, _code: u32) {}

    fn on_event(&mut self, _event_id: u32) {}

    /// A variable accepted a new value
    fn on_data_update(&mut self, _define_id: DefineId) {}

    /// At least one value changed since the previous request tick
    fn on_batch_ready(&mut self) {}

    /// A definition was refused; it is retried on the next request tick
    fn on_registration_failure(&mut self, _define_id: DefineId, _error: &SyncError) {}

    /// Raw access to every data response, accepted or not
    fn on_object_data(&mut self, _kind: MessageKind, _record: &ObjectDataRecord) {}
}

/// Listener that ignores everything
impl SyncListener for () {}

type OpenFn = Box<dyn FnMut(&OpenRecord) + Send>;
type NotifyFn = Box<dyn FnMut() + Send>;
type CodeFn = Box<dyn FnMut(u32) + Send>;
type DefineFn = Box<dyn FnMut(DefineId) + Send>;
type FailureFn = Box<dyn FnMut(DefineId, &SyncError) + Send>;
type ObjectDataFn = Box<dyn FnMut(MessageKind, &ObjectDataRecord) + Send>;

/// Listener assembled from optional closures
///
/// # Example
/// ```
/// use simvar_sync::CallbackListener;
///
/// let listener = CallbackListener::new()
///     .with_quit(|| println!("Disconnected."))
///     .with_exception(|code| eprintln!("Exception (code: {})", code));
/// ```
#[derive(Default)]
pub struct CallbackListener {
    open: Option<OpenFn>,
    quit: Option<NotifyFn>,
    exception: Option<CodeFn>,
    event: Option<CodeFn>,
    data_update: Option<DefineFn>,
    batch_ready: Option<NotifyFn>,
    registration_failure: Option<FailureFn>,
    object_data: Option<ObjectDataFn>,
}

impl CallbackListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open(mut self, f: impl FnMut(&OpenRecord) + Send + 'static) -> Self {
        self.open = Some(Box::new(f));
        self
    }

    pub fn with_quit(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.quit = Some(Box::new(f));
        self
    }

    pub fn with_exception(mut self, f: impl FnMut(u32) + Send + 'static) -> Self {
        self.exception = Some(Box::new(f));
        self
    }

    pub fn with_event(mut self, f: impl FnMut(u32) + Send + 'static) -> Self {
        self.event = Some(Box::new(f));
        self
    }

    pub fn with_data_update(mut self, f: impl FnMut(DefineId) + Send + 'static) -> Self {
        self.data_update = Some(Box::new(f));
        self
    }

    pub fn with_batch_ready(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.batch_ready = Some(Box::new(f));
        self
    }

    pub fn with_registration_failure(
        mut self,
        f: impl FnMut(DefineId, &SyncError) + Send + 'static,
    ) -> Self {
        self.registration_failure = Some(Box::new(f));
        self
    }

    pub fn with_object_data(
        mut self,
        f: impl FnMut(MessageKind, &ObjectDataRecord) + Send + 'static,
    ) -> Self {
        self.object_data = Some(Box::new(f));
        self
    }
}

impl SyncListener for CallbackListener {
    fn on_open(&mut self, open: &OpenRecord) {
        if let Some(f) = self.open.as_mut() {
            f(open);
        }
    }

    fn on_quit(&mut self) {
        if let Some(f) = self.quit.as_mut() {
            f();
        }
    }

    fn on_exception(&mut self, code: u32) {
        if let Some(f) = self.exception.as_mut() {
            f(code);
        }
    }

    fn on_event(&mut self, event_id: u32) {
        if let Some(f) = self.event.as_mut() {
            f(event_id);
        }
    }

    fn on_data_update(&mut self, define_id: DefineId) {
        if let Some(f) = self.data_update.as_mut() {
            f(define_id);
        }
    }

    fn on_batch_ready(&mut self) {
        if let Some(f) = self.batch_ready.as_mut() {
            f();
        }
    }

    fn on_registration_failure(&mut self, define_id: DefineId, error: &SyncError) {
        if let Some(f) = self.registration_failure.as_mut() {
            f(define_id, error);
        }
    }

    fn on_object_data(&mut self, kind: MessageKind, record: &ObjectDataRecord) {
        if let Some(f) = self.object_data.as_mut() {
            f(kind, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unset_callbacks_are_noops() {
        let mut listener = CallbackListener::new();
        listener.on_quit();
        listener.on_exception(3);
        listener.on_batch_ready();
    }

    #[test]
    fn test_set_callbacks_fire() {
        let seen = Arc::new(AtomicU32::new(0));
        let exceptions = Arc::clone(&seen);
        let mut listener = CallbackListener::new()
            .with_exception(move |code| exceptions.store(code, Ordering::SeqCst));

        listener.on_exception(7);
        listener.on_event(1);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_unit_listener_accepts_everything() {
        let mut listener: Box<dyn SyncListener> = Box::new(());
        listener.on_data_update(1);
        listener.on_registration_failure(1, &SyncError::InvalidConfig("x".into()));
    }
}
