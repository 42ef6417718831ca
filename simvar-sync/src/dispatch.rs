//! Dispatch classifier
//!
//! Every record the session hands back starts with a common envelope header of
//! three native-order u32 fields `{size, version, kind}`. The kind selects the
//! fixed-layout trailer that follows. Records are parsed field by field with
//! explicit bounds checks; the declared size is validated against the buffer
//! and against the trailer length before any trailer field is read.
//!
//! ## Layouts (after the 12-byte envelope)
//! - Exception: `code, send_id, index`
//! - Open: 256-byte NUL-padded application name, then eight u32 version
//!   fields (application version/build, session version/build as
//!   major/minor pairs) and two reserved u32 fields
//! - Quit: no trailer
//! - Event: `group_id, event_id, data`
//! - ObjectData / ObjectDataByType: `request_id, object_id, define_id, flags,
//!   entry_number, out_of, define_count`, then the raw value payload

use crate::types::{DefineId, RequestId, Result, SyncError};
use byteorder::{ByteOrder, NativeEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

/// Length of the application name field in an Open record
pub const APP_NAME_LEN: usize = 256;

/// Default envelope version stamped on records built by this crate
pub const DEFAULT_RECORD_VERSION: u32 = 4;

const OPEN_TRAILER_LEN: usize = APP_NAME_LEN + 10 * 4;
const EXCEPTION_TRAILER_LEN: usize = 3 * 4;
const EVENT_TRAILER_LEN: usize = 3 * 4;
const OBJECT_DATA_TRAILER_LEN: usize = 7 * 4;

/// Receive id carried in the envelope's `kind` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Null,
    Exception,
    Open,
    Quit,
    Event,
    EventObjectAddRemove,
    EventFilename,
    EventFrame,
    SimObjectData,
    SimObjectDataByType,
    WeatherObservation,
    CloudState,
    AssignedObjectId,
    ReservedKey,
    CustomAction,
    SystemState,
    ClientData,
    EventWeatherMode,
    AirportList,
    VorList,
    NdbList,
    WaypointList,
    EventMultiplayerServerStarted,
    EventMultiplayerClientStarted,
    EventMultiplayerSessionEnded,
    EventRaceEnd,
    EventRaceLap,
    Pick,
    /// A receive id outside the known table
    Unknown(u32),
}

impl MessageKind {
    const TABLE: [MessageKind; 28] = [
        MessageKind::Null,
        MessageKind::Exception,
        MessageKind::Open,
        MessageKind::Quit,
        MessageKind::Event,
        MessageKind::EventObjectAddRemove,
        MessageKind::EventFilename,
        MessageKind::EventFrame,
        MessageKind::SimObjectData,
        MessageKind::SimObjectDataByType,
        MessageKind::WeatherObservation,
        MessageKind::CloudState,
        MessageKind::AssignedObjectId,
        MessageKind::ReservedKey,
        MessageKind::CustomAction,
        MessageKind::SystemState,
        MessageKind::ClientData,
        MessageKind::EventWeatherMode,
        MessageKind::AirportList,
        MessageKind::VorList,
        MessageKind::NdbList,
        MessageKind::WaypointList,
        MessageKind::EventMultiplayerServerStarted,
        MessageKind::EventMultiplayerClientStarted,
        MessageKind::EventMultiplayerSessionEnded,
        MessageKind::EventRaceEnd,
        MessageKind::EventRaceLap,
        MessageKind::Pick,
    ];

    pub fn from_raw(raw: u32) -> Self {
        Self::TABLE
            .get(raw as usize)
            .copied()
            .unwrap_or(MessageKind::Unknown(raw))
    }

    pub fn as_raw(self) -> u32 {
        match self {
            MessageKind::Unknown(raw) => raw,
            known => Self::TABLE
                .iter()
                .position(|kind| *kind == known)
                .map(|idx| idx as u32)
                .unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Unknown(raw) => write!(f, "Unknown({})", raw),
            known => write!(f, "{:?}", known),
        }
    }
}

/// Common header prefixing every response record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEnvelope {
    /// Total record size in bytes, header included
    pub size: u32,
    pub version: u32,
    pub kind: MessageKind,
}

impl DispatchEnvelope {
    /// Encoded header length
    pub const LEN: usize = 12;

    /// Parse the header and check the declared size against the buffer
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(SyncError::MalformedDispatch(format!(
                "record has {} bytes, envelope needs {}",
                buf.len(),
                Self::LEN
            )));
        }

        let mut cursor = Cursor::new(buf);
        let size = read_u32(&mut cursor)?;
        let version = read_u32(&mut cursor)?;
        let kind = MessageKind::from_raw(read_u32(&mut cursor)?);

        if (size as usize) < Self::LEN || size as usize > buf.len() {
            return Err(SyncError::MalformedDispatch(format!(
                "declared size {} does not fit a {}-byte record",
                size,
                buf.len()
            )));
        }

        Ok(Self { size, version, kind })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        put_u32(buf, self.size);
        put_u32(buf, self.version);
        put_u32(buf, self.kind.as_raw());
    }
}

/// A `major.minor` pair as reported in the Open record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionPair {
    pub major: u32,
    pub minor: u32,
}

impl VersionPair {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for VersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Session opened: host application identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    pub app_name: String,
    pub app_version: VersionPair,
    pub app_build: VersionPair,
    pub session_version: VersionPair,
    pub session_build: VersionPair,
}

/// Exception raised by the host for an earlier call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub code: u32,
    /// Packet id of the call that caused the exception
    pub send_id: u32,
    /// Index of the offending parameter
    pub index: u32,
}

/// Client or system event notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub group_id: u32,
    pub event_id: u32,
    pub data: u32,
}

/// Object data response, shared by both data-carrying kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDataRecord {
    pub request_id: RequestId,
    /// Simulated entity the data belongs to; not used for correlation
    pub object_id: u32,
    pub define_id: DefineId,
    pub flags: u32,
    pub entry_number: u32,
    pub out_of: u32,
    pub define_count: u32,
    /// Raw value payload; its shape depends on the declared type
    pub payload: Vec<u8>,
}

impl ObjectDataRecord {
    /// A single-entry response for one define id
    pub fn new(request_id: RequestId, define_id: DefineId, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            object_id: 0,
            define_id,
            flags: 0,
            entry_number: 1,
            out_of: 1,
            define_count: 1,
            payload,
        }
    }
}

/// Parsed body of a dispatch record
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Opened(OpenRecord),
    Quit,
    Exception(ExceptionRecord),
    Event(EventRecord),
    /// Response to a per-object request
    ObjectData(ObjectDataRecord),
    /// Response to a by-type request; same layout as `ObjectData`
    ObjectDataByType(ObjectDataRecord),
    /// Any kind without a dedicated parser, including ids outside the table
    Unknown(MessageKind),
}

/// A complete record: envelope plus parsed body
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchMessage {
    pub envelope: DispatchEnvelope,
    pub body: Dispatch,
}

impl DispatchMessage {
    /// Wrap a body with an envelope stamped with the default version
    ///
    /// The envelope size is filled in by `encode`.
    pub fn new(body: Dispatch) -> Self {
        let kind = match &body {
            Dispatch::Opened(_) => MessageKind::Open,
            Dispatch::Quit => MessageKind::Quit,
            Dispatch::Exception(_) => MessageKind::Exception,
            Dispatch::Event(_) => MessageKind::Event,
            Dispatch::ObjectData(_) => MessageKind::SimObjectData,
            Dispatch::ObjectDataByType(_) => MessageKind::SimObjectDataByType,
            Dispatch::Unknown(kind) => *kind,
        };
        Self {
            envelope: DispatchEnvelope {
                size: DispatchEnvelope::LEN as u32,
                version: DEFAULT_RECORD_VERSION,
                kind,
            },
            body,
        }
    }

    /// Encode into the bit-exact native-order wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut trailer = Vec::new();
        match &self.body {
            Dispatch::Opened(open) => {
                let mut name = open.app_name.as_bytes().to_vec();
                // Keep room for the terminating NUL
                name.truncate(APP_NAME_LEN - 1);
                name.resize(APP_NAME_LEN, 0);
                trailer.extend_from_slice(&name);
                for pair in [
                    open.app_version,
                    open.app_build,
                    open.session_version,
                    open.session_build,
                ] {
                    put_u32(&mut trailer, pair.major);
                    put_u32(&mut trailer, pair.minor);
                }
                put_u32(&mut trailer, 0);
                put_u32(&mut trailer, 0);
            }
            Dispatch::Quit | Dispatch::Unknown(_) => {}
            Dispatch::Exception(exception) => {
                put_u32(&mut trailer, exception.code);
                put_u32(&mut trailer, exception.send_id);
                put_u32(&mut trailer, exception.index);
            }
            Dispatch::Event(event) => {
                put_u32(&mut trailer, event.group_id);
                put_u32(&mut trailer, event.event_id);
                put_u32(&mut trailer, event.data);
            }
            Dispatch::ObjectData(data) | Dispatch::ObjectDataByType(data) => {
                for field in [
                    data.request_id,
                    data.object_id,
                    data.define_id,
                    data.flags,
                    data.entry_number,
                    data.out_of,
                    data.define_count,
                ] {
                    put_u32(&mut trailer, field);
                }
                trailer.extend_from_slice(&data.payload);
            }
        }

        let envelope = DispatchEnvelope {
            size: (DispatchEnvelope::LEN + trailer.len()) as u32,
            ..self.envelope
        };
        let mut buf = Vec::with_capacity(envelope.size as usize);
        envelope.write_to(&mut buf);
        buf.extend_from_slice(&trailer);
        buf
    }
}

/// Dispatch classifier - routes raw records to their per-kind parser
pub struct DispatchClassifier;

impl DispatchClassifier {
    /// Read only the kind from a raw record
    pub fn classify(buf: &[u8]) -> Result<MessageKind> {
        Ok(DispatchEnvelope::parse(buf)?.kind)
    }

    /// Parse a raw record into its envelope and typed body
    pub fn parse(buf: &[u8]) -> Result<DispatchMessage> {
        let envelope = DispatchEnvelope::parse(buf)?;
        let record = &buf[..envelope.size as usize];
        let trailer = &record[DispatchEnvelope::LEN..];

        let body = match envelope.kind {
            MessageKind::Open => Dispatch::Opened(Self::parse_open(trailer)?),
            MessageKind::Quit => Dispatch::Quit,
            MessageKind::Exception => Dispatch::Exception(Self::parse_exception(trailer)?),
            MessageKind::Event => Dispatch::Event(Self::parse_event(trailer)?),
            MessageKind::SimObjectData => {
                Dispatch::ObjectData(Self::parse_object_data(trailer, envelope.kind)?)
            }
            MessageKind::SimObjectDataByType => {
                Dispatch::ObjectDataByType(Self::parse_object_data(trailer, envelope.kind)?)
            }
            other => Dispatch::Unknown(other),
        };

        Ok(DispatchMessage { envelope, body })
    }

    fn parse_open(trailer: &[u8]) -> Result<OpenRecord> {
        check_trailer(MessageKind::Open, trailer, OPEN_TRAILER_LEN)?;
        let mut cursor = Cursor::new(trailer);

        let mut name = [0u8; APP_NAME_LEN];
        cursor.read_exact(&mut name).map_err(truncated)?;
        let end = name.iter().position(|b| *b == 0).unwrap_or(APP_NAME_LEN);
        let app_name = String::from_utf8_lossy(&name[..end]).into_owned();

        let mut pairs = [VersionPair::default(); 4];
        for pair in pairs.iter_mut() {
            pair.major = read_u32(&mut cursor)?;
            pair.minor = read_u32(&mut cursor)?;
        }

        Ok(OpenRecord {
            app_name,
            app_version: pairs[0],
            app_build: pairs[1],
            session_version: pairs[2],
            session_build: pairs[3],
        })
    }

    fn parse_exception(trailer: &[u8]) -> Result<ExceptionRecord> {
        check_trailer(MessageKind::Exception, trailer, EXCEPTION_TRAILER_LEN)?;
        let mut cursor = Cursor::new(trailer);
        Ok(ExceptionRecord {
            code: read_u32(&mut cursor)?,
            send_id: read_u32(&mut cursor)?,
            index: read_u32(&mut cursor)?,
        })
    }

    fn parse_event(trailer: &[u8]) -> Result<EventRecord> {
        check_trailer(MessageKind::Event, trailer, EVENT_TRAILER_LEN)?;
        let mut cursor = Cursor::new(trailer);
        Ok(EventRecord {
            group_id: read_u32(&mut cursor)?,
            event_id: read_u32(&mut cursor)?,
            data: read_u32(&mut cursor)?,
        })
    }

    fn parse_object_data(trailer: &[u8], kind: MessageKind) -> Result<ObjectDataRecord> {
        check_trailer(kind, trailer, OBJECT_DATA_TRAILER_LEN)?;
        let mut cursor = Cursor::new(trailer);
        Ok(ObjectDataRecord {
            request_id: read_u32(&mut cursor)?,
            object_id: read_u32(&mut cursor)?,
            define_id: read_u32(&mut cursor)?,
            flags: read_u32(&mut cursor)?,
            entry_number: read_u32(&mut cursor)?,
            out_of: read_u32(&mut cursor)?,
            define_count: read_u32(&mut cursor)?,
            payload: trailer[OBJECT_DATA_TRAILER_LEN..].to_vec(),
        })
    }
}

fn check_trailer(kind: MessageKind, trailer: &[u8], expected: usize) -> Result<()> {
    if trailer.len() < expected {
        return Err(SyncError::MalformedDispatch(format!(
            "{} trailer has {} bytes, expected at least {}",
            kind,
            trailer.len(),
            expected
        )));
    }
    Ok(())
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor.read_u32::<NativeEndian>().map_err(truncated)
}

fn truncated(e: std::io::Error) -> SyncError {
    SyncError::MalformedDispatch(format!("truncated record: {}", e))
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    let mut field = [0; 4];
    NativeEndian::write_u32(&mut field, value);
    buf.extend_from_slice(&field);
}
