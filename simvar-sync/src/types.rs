//! Core types for the simulation variable synchronization engine
//!
//! This module defines the fundamental vocabulary shared by every other module:
//! ids, declared data types, decoded values and the error taxonomy. Nothing here
//! talks to a session or holds a lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Timestamp type used throughout the engine
pub type Timestamp = DateTime<Utc>;

/// Registry-assigned id identifying a variable definition to the session
pub type DefineId = u32;

/// Id correlating one outstanding request to its eventual response
pub type RequestId = u32;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Malformed dispatch record: {0}")]
    MalformedDispatch(String),

    #[error("Registration of define id {define_id} failed: {source}")]
    RegistrationFailure {
        define_id: DefineId,
        #[source]
        source: SessionError,
    },

    #[error("Dispatch source failed: {0}")]
    DispatchFailure(#[source] SessionError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No define id left for variable '{name}'")]
    DefineIdsExhausted { name: String },

    #[error("Variable '{0}' is not tracked")]
    UnknownVariable(String),

    #[error("Value {value} cannot be written to '{name}' ({data_type})")]
    ValueTypeMismatch {
        name: String,
        data_type: DataType,
        value: Value,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A failed call into the session collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{call} failed with HRESULT 0x{code:08X}")]
    CallFailed { call: &'static str, code: u32 },

    #[error("Session is not open")]
    NotOpen,

    #[error("Client library not found: {0}")]
    LibraryNotFound(String),

    #[error("Failed to load client library: {0}")]
    LibraryLoad(String),

    #[error("Missing entry point: {0}")]
    MissingSymbol(String),

    #[error("Invalid argument for {call}: {reason}")]
    InvalidArgument { call: &'static str, reason: String },
}

/// Data type tag a variable is declared with
///
/// The discriminants are the tags the session uses on the wire. Only
/// `Int32` through `StringV` are decodable; the structured tags are known
/// but produce no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum DataType {
    Invalid = 0,
    Int32 = 1,
    Int64 = 2,
    Float32 = 3,
    Float64 = 4,
    String8 = 5,
    String32 = 6,
    String64 = 7,
    String128 = 8,
    String256 = 9,
    String260 = 10,
    StringV = 11,
    InitPosition = 12,
    MarkerState = 13,
    Waypoint = 14,
    LatLonAlt = 15,
    Xyz = 16,
}

impl DataType {
    const ALL: [DataType; 17] = [
        DataType::Invalid,
        DataType::Int32,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
        DataType::String8,
        DataType::String32,
        DataType::String64,
        DataType::String128,
        DataType::String256,
        DataType::String260,
        DataType::StringV,
        DataType::InitPosition,
        DataType::MarkerState,
        DataType::Waypoint,
        DataType::LatLonAlt,
        DataType::Xyz,
    ];

    /// Map a raw wire tag; unknown tags become `Invalid`
    pub fn from_raw(raw: u32) -> Self {
        Self::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(DataType::Invalid)
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Lowercase name used in configuration files and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            DataType::Invalid => "invalid",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String8 => "string8",
            DataType::String32 => "string32",
            DataType::String64 => "string64",
            DataType::String128 => "string128",
            DataType::String256 => "string256",
            DataType::String260 => "string260",
            DataType::StringV => "stringv",
            DataType::InitPosition => "initposition",
            DataType::MarkerState => "markerstate",
            DataType::Waypoint => "waypoint",
            DataType::LatLonAlt => "latlonalt",
            DataType::Xyz => "xyz",
        }
    }

    /// True for the fixed and variable string kinds
    pub fn is_string(self) -> bool {
        self.fixed_capacity().is_some() || self == DataType::StringV
    }

    /// Buffer capacity of a fixed string kind
    pub fn fixed_capacity(self) -> Option<usize> {
        match self {
            DataType::String8 => Some(8),
            DataType::String32 => Some(32),
            DataType::String64 => Some(64),
            DataType::String128 => Some(128),
            DataType::String256 => Some(256),
            DataType::String260 => Some(260),
            _ => None,
        }
    }

    /// True if the value codec can produce a value for this tag
    pub fn is_decodable(self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
        ) || self.is_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|data_type| data_type.name() == wanted)
            .ok_or_else(|| SyncError::UnknownDataType(s.to_string()))
    }
}

/// Fixed-capacity string buffer as delivered by the session
///
/// The logical value is the bytes up to the first NUL, or the full buffer
/// when no NUL is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedString {
    capacity: usize,
    bytes: Vec<u8>,
}

impl FixedString {
    /// Wrap a raw buffer; the buffer length is its capacity
    pub fn from_buffer(bytes: Vec<u8>) -> Self {
        Self {
            capacity: bytes.len(),
            bytes,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes up to the first NUL
    pub fn logical_bytes(&self) -> &[u8] {
        match self.bytes.iter().position(|b| *b == 0) {
            Some(end) => &self.bytes[..end],
            None => &self.bytes,
        }
    }

    /// Copy with the buffer truncated at the first NUL, capacity kept
    pub fn trimmed(&self) -> Self {
        Self {
            capacity: self.capacity,
            bytes: self.logical_bytes().to_vec(),
        }
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.logical_bytes())
    }
}

impl Serialize for FixedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

/// A decoded variable value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    FixedString(FixedString),
    VariableString(String),
}

impl Value {
    /// Numeric view of the value; strings have none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::FixedString(_) | Value::VariableString(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::Float32(v) => Some(*v as i64),
            Value::Float64(v) => Some(*v as i64),
            Value::FixedString(_) | Value::VariableString(_) => None,
        }
    }

    /// Text view of a string value
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::FixedString(s) => Some(s.as_str()),
            Value::VariableString(s) => Some(Cow::Borrowed(s.as_str())),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::FixedString(_) | Value::VariableString(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{:.6}", v),
            Value::Float64(v) => write!(f, "{:.6}", v),
            Value::FixedString(s) => write!(f, "{}", s.as_str()),
            Value::VariableString(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_raw_mapping() {
        assert_eq!(DataType::from_raw(4), DataType::Float64);
        assert_eq!(DataType::from_raw(16), DataType::Xyz);
        assert_eq!(DataType::from_raw(99), DataType::Invalid);
        assert_eq!(DataType::String260.as_raw(), 10);
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!("float64".parse::<DataType>().unwrap(), DataType::Float64);
        assert_eq!("STRING64".parse::<DataType>().unwrap(), DataType::String64);
        assert!("double".parse::<DataType>().is_err());
        assert_eq!(DataType::StringV.to_string(), "stringv");
    }

    #[test]
    fn test_data_type_classes() {
        assert!(DataType::String8.is_string());
        assert!(DataType::StringV.is_string());
        assert!(!DataType::Int32.is_string());
        assert_eq!(DataType::String260.fixed_capacity(), Some(260));
        assert_eq!(DataType::StringV.fixed_capacity(), None);
        assert!(DataType::Float32.is_decodable());
        assert!(!DataType::Waypoint.is_decodable());
        assert!(!DataType::Invalid.is_decodable());
    }

    #[test]
    fn test_fixed_string_logical_value() {
        let padded = FixedString::from_buffer(b"N172SP\0\0".to_vec());
        assert_eq!(padded.capacity(), 8);
        assert_eq!(padded.as_str(), "N172SP");

        let full = FixedString::from_buffer(b"ABCDEFGH".to_vec());
        assert_eq!(full.as_str(), "ABCDEFGH");

        let trimmed = padded.trimmed();
        assert_eq!(trimmed.as_bytes(), b"N172SP");
        assert_eq!(trimmed.capacity(), 8);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::Int32(42).as_f64(), Some(42.0));
        assert_eq!(Value::Float64(3.9).as_i64(), Some(3));
        assert_eq!(Value::VariableString("x".into()).as_f64(), None);
        assert_eq!(format!("{}", Value::Int64(-7)), "-7");
        assert!(Value::FixedString(FixedString::from_buffer(vec![0; 8])).is_string());
    }
}
