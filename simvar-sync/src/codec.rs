//! Value codec
//!
//! Interprets the value payload of a data response according to the variable's
//! declared data type. The type never travels on the wire; the caller looks it
//! up in the registry by define id.
//!
//! Numeric slots are read in native byte order, matching the session's memory
//! layout. Fixed strings are copied verbatim at their declared capacity; the
//! NUL-trim rule is applied when the registry stores the value.

use crate::types::{DataType, FixedString, Value};
use byteorder::{ByteOrder, NativeEndian, ReadBytesExt};
use std::io::Cursor;

/// Value codec - decodes and encodes value payloads
pub struct ValueCodec;

impl ValueCodec {
    /// Decode a value payload for the given declared type
    ///
    /// Returns `None` for tags the codec does not support and for payloads
    /// too short for the declared type. Neither case is an error: the message
    /// simply produces no update.
    pub fn decode(data_type: DataType, payload: &[u8]) -> Option<Value> {
        let mut cursor = Cursor::new(payload);

        let value = match data_type {
            DataType::Int32 => Value::Int32(cursor.read_i32::<NativeEndian>().ok()?),
            DataType::Int64 => Value::Int64(cursor.read_i64::<NativeEndian>().ok()?),
            DataType::Float32 => Value::Float32(cursor.read_f32::<NativeEndian>().ok()?),
            DataType::Float64 => Value::Float64(cursor.read_f64::<NativeEndian>().ok()?),
            DataType::StringV => {
                let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
                Value::VariableString(String::from_utf8_lossy(&payload[..end]).into_owned())
            }
            other => {
                let capacity = match other.fixed_capacity() {
                    Some(capacity) => capacity,
                    None => {
                        log::debug!("No value codec for data type {}", other);
                        return None;
                    }
                };
                if payload.len() < capacity {
                    log::debug!(
                        "{} payload has {} bytes, expected {}",
                        other,
                        payload.len(),
                        capacity
                    );
                    return None;
                }
                Value::FixedString(FixedString::from_buffer(payload[..capacity].to_vec()))
            }
        };

        Some(value)
    }

    /// Encode a value into the payload shape the session would deliver
    pub fn encode(value: &Value) -> Vec<u8> {
        match value {
            Value::Int32(v) => {
                let mut buf = vec![0; 4];
                NativeEndian::write_i32(&mut buf, *v);
                buf
            }
            Value::Int64(v) => {
                let mut buf = vec![0; 8];
                NativeEndian::write_i64(&mut buf, *v);
                buf
            }
            Value::Float32(v) => {
                let mut buf = vec![0; 4];
                NativeEndian::write_f32(&mut buf, *v);
                buf
            }
            Value::Float64(v) => {
                let mut buf = vec![0; 8];
                NativeEndian::write_f64(&mut buf, *v);
                buf
            }
            Value::FixedString(s) => {
                let mut buf = s.as_bytes().to_vec();
                buf.resize(s.capacity(), 0);
                buf
            }
            Value::VariableString(s) => {
                let mut buf = Vec::with_capacity(s.len() + 1);
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Encode a value in the layout of a declared type
    ///
    /// Numbers convert between the numeric types and text fills the string
    /// types. Returns `None` when the value cannot take the declared shape:
    /// text for a number, a number for text, an integer out of range or a
    /// type the codec does not support.
    pub fn encode_as(data_type: DataType, value: &Value) -> Option<Vec<u8>> {
        let converted = match data_type {
            DataType::Int32 => Value::Int32(i32::try_from(value.as_i64()?).ok()?),
            DataType::Int64 => Value::Int64(value.as_i64()?),
            DataType::Float32 => Value::Float32(value.as_f64()? as f32),
            DataType::Float64 => Value::Float64(value.as_f64()?),
            DataType::StringV => Value::VariableString(value.as_text()?.into_owned()),
            other => {
                let capacity = other.fixed_capacity()?;
                Value::FixedString(Self::fixed_string(&value.as_text()?, capacity))
            }
        };
        Some(Self::encode(&converted))
    }

    /// Build a NUL-padded fixed string of the given capacity
    ///
    /// Text longer than the capacity is cut to fit.
    pub fn fixed_string(text: &str, capacity: usize) -> FixedString {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(capacity, 0);
        FixedString::from_buffer(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_numeric_native_order() {
        let payload = 42i32.to_ne_bytes();
        assert_eq!(ValueCodec::decode(DataType::Int32, &payload), Some(Value::Int32(42)));

        let payload = (-9_000_000_000i64).to_ne_bytes();
        assert_eq!(
            ValueCodec::decode(DataType::Int64, &payload),
            Some(Value::Int64(-9_000_000_000))
        );

        let payload = 1.5f32.to_ne_bytes();
        assert_eq!(ValueCodec::decode(DataType::Float32, &payload), Some(Value::Float32(1.5)));

        let payload = 118.25f64.to_ne_bytes();
        assert_eq!(
            ValueCodec::decode(DataType::Float64, &payload),
            Some(Value::Float64(118.25))
        );
    }

    #[test]
    fn test_decode_short_payload_yields_nothing() {
        assert_eq!(ValueCodec::decode(DataType::Float64, &[0, 1, 2]), None);
        assert_eq!(ValueCodec::decode(DataType::String64, &[b'A'; 10]), None);
    }

    #[test]
    fn test_decode_unsupported_types_yield_nothing() {
        let payload = [0u8; 64];
        assert_eq!(ValueCodec::decode(DataType::Invalid, &payload), None);
        assert_eq!(ValueCodec::decode(DataType::InitPosition, &payload), None);
        assert_eq!(ValueCodec::decode(DataType::Xyz, &payload), None);
    }

    #[test]
    fn test_decode_fixed_string_keeps_raw_buffer() {
        let mut payload = b"Cessna 172".to_vec();
        payload.resize(32, 0);

        match ValueCodec::decode(DataType::String32, &payload) {
            Some(Value::FixedString(s)) => {
                assert_eq!(s.capacity(), 32);
                assert_eq!(s.as_bytes().len(), 32);
                assert_eq!(s.as_str(), "Cessna 172");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_fixed_string_without_nul() {
        let payload = b"ABCDEFGH".to_vec();
        match ValueCodec::decode(DataType::String8, &payload) {
            Some(Value::FixedString(s)) => assert_eq!(s.as_str(), "ABCDEFGH"),
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_variable_string() {
        let payload = b"KJFK\0garbage".to_vec();
        assert_eq!(
            ValueCodec::decode(DataType::StringV, &payload),
            Some(Value::VariableString("KJFK".to_string()))
        );
    }

    #[test]
    fn test_string_trim_round_trip() {
        for capacity in [8usize, 32, 64, 128, 256, 260] {
            let text = "N12345";
            let original = Value::FixedString(ValueCodec::fixed_string(text, capacity));
            let data_type = match capacity {
                8 => DataType::String8,
                32 => DataType::String32,
                64 => DataType::String64,
                128 => DataType::String128,
                256 => DataType::String256,
                _ => DataType::String260,
            };

            let first = ValueCodec::decode(data_type, &ValueCodec::encode(&original)).unwrap();
            assert_eq!(first.as_text().unwrap(), text);

            let second = ValueCodec::decode(data_type, &ValueCodec::encode(&first)).unwrap();
            assert_eq!(second.as_text().unwrap(), text);
        }
    }

    #[test]
    fn test_encode_native_layout() {
        assert_eq!(ValueCodec::encode(&Value::Int32(-2)), (-2i32).to_ne_bytes().to_vec());
        assert_eq!(ValueCodec::encode(&Value::Int64(1 << 40)), (1i64 << 40).to_ne_bytes().to_vec());
        assert_eq!(ValueCodec::encode(&Value::Float32(0.5)), 0.5f32.to_ne_bytes().to_vec());
        assert_eq!(ValueCodec::encode(&Value::Float64(2500.0)), 2500.0f64.to_ne_bytes().to_vec());

        let padded = ValueCodec::encode(&Value::FixedString(ValueCodec::fixed_string("N172SP", 8)));
        assert_eq!(padded, b"N172SP\0\0".to_vec());
        assert_eq!(ValueCodec::encode(&Value::VariableString("ab".into())), b"ab\0".to_vec());
    }

    #[test]
    fn test_encode_as_declared_type() {
        assert_eq!(
            ValueCodec::encode_as(DataType::Float64, &Value::Int32(3000)),
            Some(3000.0f64.to_ne_bytes().to_vec())
        );
        assert_eq!(
            ValueCodec::encode_as(DataType::Int32, &Value::Float64(1.0)),
            Some(1i32.to_ne_bytes().to_vec())
        );
        assert_eq!(ValueCodec::encode_as(DataType::Int32, &Value::Int64(1 << 40)), None);

        let title = Value::VariableString("Baron 58".to_string());
        let encoded = ValueCodec::encode_as(DataType::String8, &title).unwrap();
        assert_eq!(encoded, b"Baron 58".to_vec());
        assert_eq!(ValueCodec::encode_as(DataType::StringV, &title), Some(b"Baron 58\0".to_vec()));

        assert_eq!(ValueCodec::encode_as(DataType::Float64, &title), None);
        assert_eq!(ValueCodec::encode_as(DataType::String32, &Value::Int32(1)), None);
        assert_eq!(ValueCodec::encode_as(DataType::Waypoint, &Value::Float64(1.0)), None);
    }
}
