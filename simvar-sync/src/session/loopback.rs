//! In-memory session
//!
//! `LoopbackSession` behaves like a host that answers every data request on
//! the next drain: it queues an Open record when opened, a data record per
//! request and an Exception record for calls naming an unknown define id.
//! Values come from a pluggable `ValueSource` until a client writes one; from
//! then on the written value is reported.

use super::Session;
use crate::codec::ValueCodec;
use crate::dispatch::{
    Dispatch, DispatchMessage, EventRecord, ExceptionRecord, ObjectDataRecord, OpenRecord,
    VersionPair,
};
use crate::types::{DataType, DefineId, RequestId, SessionError, Value};
use std::collections::{HashMap, VecDeque};

/// Exception code the host uses for an unrecognized id
pub const EXCEPTION_UNRECOGNIZED_ID: u32 = 3;

/// Produces the value the loopback host reports for a variable
pub trait ValueSource: Send {
    /// `None` means the host sends nothing for this request
    fn value_for(&mut self, name: &str, data_type: DataType) -> Option<Value>;
}

impl<F> ValueSource for F
where
    F: FnMut(&str, DataType) -> Option<Value> + Send,
{
    fn value_for(&mut self, name: &str, data_type: DataType) -> Option<Value> {
        self(name, data_type)
    }
}

/// Default source: a counter per variable, rendered in the declared type
#[derive(Debug, Default)]
pub struct CountingSource {
    counters: HashMap<String, u64>,
}

impl ValueSource for CountingSource {
    fn value_for(&mut self, name: &str, data_type: DataType) -> Option<Value> {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        let n = *counter;

        match data_type {
            DataType::Int32 => Some(Value::Int32(n as i32)),
            DataType::Int64 => Some(Value::Int64(n as i64)),
            DataType::Float32 => Some(Value::Float32(n as f32 * 0.5)),
            DataType::Float64 => Some(Value::Float64(n as f64 * 0.5)),
            DataType::StringV => Some(Value::VariableString(format!("{} {}", name, n))),
            other => other
                .fixed_capacity()
                .map(|capacity| Value::FixedString(ValueCodec::fixed_string(&format!("{} {}", name, n), capacity))),
        }
    }
}

struct Definition {
    name: String,
    data_type: DataType,
    /// Last value written by the client
    written: Option<Value>,
}

/// Session that answers from memory
pub struct LoopbackSession {
    open: bool,
    app_name: String,
    definitions: HashMap<DefineId, Definition>,
    inbox: VecDeque<Vec<u8>>,
    source: Box<dyn ValueSource>,
}

impl LoopbackSession {
    /// Loopback host reporting counter values
    pub fn new() -> Self {
        Self::with_source(CountingSource::default())
    }

    pub fn with_source(source: impl ValueSource + 'static) -> Self {
        Self {
            open: false,
            app_name: "Loopback".to_string(),
            definitions: HashMap::new(),
            inbox: VecDeque::new(),
            source: Box::new(source),
        }
    }

    /// Queue a record as if the host had sent it
    pub fn push_record(&mut self, body: Dispatch) {
        self.inbox.push_back(DispatchMessage::new(body).encode());
    }

    /// Queue raw bytes verbatim
    pub fn push_raw(&mut self, bytes: Vec<u8>) {
        self.inbox.push_back(bytes);
    }

    /// Queue a Quit record, as a host shutting down would
    pub fn quit(&mut self) {
        self.push_record(Dispatch::Quit);
    }

    /// Queue a client event notification
    pub fn raise_event(&mut self, group_id: u32, event_id: u32, data: u32) {
        self.push_record(Dispatch::Event(EventRecord {
            group_id,
            event_id,
            data,
        }));
    }

    /// Records waiting to be drained
    pub fn queued(&self) -> usize {
        self.inbox.len()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.open {
            Ok(())
        } else {
            Err(SessionError::NotOpen)
        }
    }

    fn unrecognized_id(&mut self, send_id: u32) {
        self.push_record(Dispatch::Exception(ExceptionRecord {
            code: EXCEPTION_UNRECOGNIZED_ID,
            send_id,
            index: 2,
        }));
    }
}

impl Default for LoopbackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for LoopbackSession {
    fn open(&mut self, name: &str) -> Result<(), SessionError> {
        log::info!("Loopback session opened for client '{}'", name);
        self.open = true;
        let version = VersionPair::new(0, 1);
        self.push_record(Dispatch::Opened(OpenRecord {
            app_name: self.app_name.clone(),
            app_version: version,
            app_build: version,
            session_version: version,
            session_build: version,
        }));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.open = false;
        self.inbox.clear();
        Ok(())
    }

    fn register_variable(
        &mut self,
        define_id: DefineId,
        name: &str,
        _unit: &str,
        data_type: DataType,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.definitions.insert(
            define_id,
            Definition {
                name: name.to_string(),
                data_type,
                written: None,
            },
        );
        Ok(())
    }

    fn request_variable(&mut self, request_id: RequestId, define_id: DefineId) -> Result<(), SessionError> {
        self.ensure_open()?;

        let Some(definition) = self.definitions.get(&define_id) else {
            // The host reports bad ids asynchronously, not through the call
            self.unrecognized_id(request_id);
            return Ok(());
        };

        let value = match &definition.written {
            Some(value) => Some(value.clone()),
            None => self.source.value_for(&definition.name, definition.data_type),
        };
        if let Some(value) = value {
            let record = ObjectDataRecord::new(request_id, define_id, ValueCodec::encode(&value));
            self.push_record(Dispatch::ObjectDataByType(record));
        }
        Ok(())
    }

    fn set_variable(&mut self, define_id: DefineId, payload: &[u8]) -> Result<(), SessionError> {
        self.ensure_open()?;

        let Some(definition) = self.definitions.get_mut(&define_id) else {
            self.unrecognized_id(0);
            return Ok(());
        };

        match ValueCodec::decode(definition.data_type, payload) {
            Some(value) => {
                log::debug!("Loopback '{}' set to {}", definition.name, value);
                definition.written = Some(value);
            }
            None => log::debug!(
                "Loopback ignored {}-byte write to '{}'",
                payload.len(),
                definition.name
            ),
        }
        Ok(())
    }

    fn poll_next(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        self.ensure_open()?;
        Ok(self.inbox.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchClassifier;

    #[test]
    fn test_calls_require_open_session() {
        let mut session = LoopbackSession::new();
        assert_eq!(session.poll_next(), Err(SessionError::NotOpen));
        assert_eq!(
            session.register_variable(1, "A", "", DataType::Int32),
            Err(SessionError::NotOpen)
        );
    }

    #[test]
    fn test_open_queues_open_record() {
        let mut session = LoopbackSession::new();
        session.open("test").unwrap();

        let bytes = session.poll_next().unwrap().unwrap();
        match DispatchClassifier::parse(&bytes).unwrap().body {
            Dispatch::Opened(open) => assert_eq!(open.app_name, "Loopback"),
            other => panic!("unexpected body: {:?}", other),
        }
        assert_eq!(session.poll_next().unwrap(), None);
    }

    #[test]
    fn test_request_answers_with_typed_value() {
        let mut session = LoopbackSession::with_source(|_: &str, _: DataType| Some(Value::Float64(88.5)));
        session.open("test").unwrap();
        session.poll_next().unwrap();

        session.register_variable(4, "AIRSPEED INDICATED", "knot", DataType::Float64).unwrap();
        session.request_variable(12, 4).unwrap();

        let bytes = session.poll_next().unwrap().unwrap();
        match DispatchClassifier::parse(&bytes).unwrap().body {
            Dispatch::ObjectDataByType(record) => {
                assert_eq!(record.request_id, 12);
                assert_eq!(record.define_id, 4);
                assert_eq!(
                    ValueCodec::decode(DataType::Float64, &record.payload),
                    Some(Value::Float64(88.5))
                );
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_define_id_raises_exception() {
        let mut session = LoopbackSession::new();
        session.open("test").unwrap();
        session.poll_next().unwrap();

        session.request_variable(1, 99).unwrap();
        let bytes = session.poll_next().unwrap().unwrap();
        match DispatchClassifier::parse(&bytes).unwrap().body {
            Dispatch::Exception(exception) => assert_eq!(exception.code, EXCEPTION_UNRECOGNIZED_ID),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_counting_source_per_type() {
        let mut source = CountingSource::default();
        assert_eq!(source.value_for("A", DataType::Int32), Some(Value::Int32(1)));
        assert_eq!(source.value_for("A", DataType::Int32), Some(Value::Int32(2)));
        assert_eq!(source.value_for("B", DataType::Float64), Some(Value::Float64(0.5)));
        assert_eq!(source.value_for("C", DataType::Waypoint), None);

        match source.value_for("TITLE", DataType::String32) {
            Some(Value::FixedString(s)) => {
                assert_eq!(s.capacity(), 32);
                assert_eq!(s.as_str(), "TITLE 1");
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_written_value_is_reported() {
        let mut session = LoopbackSession::with_source(|_: &str, _: DataType| Some(Value::Float64(1.0)));
        session.open("test").unwrap();
        session.poll_next().unwrap();
        session.register_variable(2, "PLANE ALTITUDE", "feet", DataType::Float64).unwrap();

        session.set_variable(2, &4500.0f64.to_ne_bytes()).unwrap();
        assert_eq!(session.queued(), 0);

        session.request_variable(8, 2).unwrap();
        let bytes = session.poll_next().unwrap().unwrap();
        match DispatchClassifier::parse(&bytes).unwrap().body {
            Dispatch::ObjectDataByType(record) => assert_eq!(
                ValueCodec::decode(DataType::Float64, &record.payload),
                Some(Value::Float64(4500.0))
            ),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_write_to_unknown_define_id_raises_exception() {
        let mut session = LoopbackSession::new();
        assert_eq!(session.set_variable(1, &[0; 8]), Err(SessionError::NotOpen));

        session.open("test").unwrap();
        session.poll_next().unwrap();
        session.set_variable(42, &[0; 8]).unwrap();

        let bytes = session.poll_next().unwrap().unwrap();
        match DispatchClassifier::parse(&bytes).unwrap().body {
            Dispatch::Exception(exception) => assert_eq!(exception.code, EXCEPTION_UNRECOGNIZED_ID),
            other => panic!("unexpected body: {:?}", other),
        }
    }
}
