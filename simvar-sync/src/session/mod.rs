//! Session collaborator
//!
//! The engine never talks to the simulation host directly. Everything goes
//! through `Session`, a mechanical one-call-per-operation surface. The CLI
//! provides a native implementation; `LoopbackSession` answers in memory.

use crate::types::{DataType, DefineId, RequestId, SessionError};

pub mod loopback;

pub use loopback::{LoopbackSession, ValueSource};

/// One call per host operation
///
/// Responses are not returned by the calls that cause them: they arrive
/// later, in any order, through `poll_next`.
pub trait Session: Send {
    fn open(&mut self, name: &str) -> Result<(), SessionError>;

    fn close(&mut self) -> Result<(), SessionError>;

    /// Tell the host a variable definition exists
    fn register_variable(
        &mut self,
        define_id: DefineId,
        name: &str,
        unit: &str,
        data_type: DataType,
    ) -> Result<(), SessionError>;

    /// Ask for the current value of a registered variable
    fn request_variable(&mut self, request_id: RequestId, define_id: DefineId) -> Result<(), SessionError>;

    /// Write a value to a registered variable on the user object
    ///
    /// `payload` is the value in the variable's declared layout. Like
    /// requests, a bad define id is reported later as an Exception record.
    fn set_variable(&mut self, define_id: DefineId, payload: &[u8]) -> Result<(), SessionError>;

    /// Take the next raw record without blocking
    ///
    /// `Ok(None)` means nothing is waiting. An error is fatal to the poll loop.
    fn poll_next(&mut self) -> Result<Option<Vec<u8>>, SessionError>;
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn open(&mut self, name: &str) -> Result<(), SessionError> {
        (**self).open(name)
    }

    fn close(&mut self) -> Result<(), SessionError> {
        (**self).close()
    }

    fn register_variable(
        &mut self,
        define_id: DefineId,
        name: &str,
        unit: &str,
        data_type: DataType,
    ) -> Result<(), SessionError> {
        (**self).register_variable(define_id, name, unit, data_type)
    }

    fn request_variable(&mut self, request_id: RequestId, define_id: DefineId) -> Result<(), SessionError> {
        (**self).request_variable(request_id, define_id)
    }

    fn set_variable(&mut self, define_id: DefineId, payload: &[u8]) -> Result<(), SessionError> {
        (**self).set_variable(define_id, payload)
    }

    fn poll_next(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        (**self).poll_next()
    }
}
