//! Minimal built-in column value representation and codec.
//!
//! The connection-engine core treats value encoding/decoding as an external
//! concern (see the crate-level docs): callers may plug in their own
//! [`Decoder`], [`Encoder`] and [`Formatter`] via [`crate::Opts`]. This module
//! supplies a small built-in codec covering the common primitive OIDs so the
//! engine is directly usable without writing one.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

/// A decoded or to-be-encoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The OID this value naturally encodes to when the caller hasn't been
    /// told what the server expects (used to populate `Parse`'s parameter
    /// type hints).
    pub fn natural_oid(&self) -> Oid {
        match self {
            Value::Null => 0,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Text(_) => oid::TEXT,
            Value::Bytes(_) => oid::BYTEA,
        }
    }
}

/// Decodes a column value off the wire given its OID and the format it was
/// sent in. Implementors may consult a dynamically bootstrapped type
/// registry; the built-in [`DefaultDecoder`] only understands the OIDs
/// listed on [`Value`].
pub trait Decoder: Send + Sync {
    fn decode(&self, oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value>;
}

/// Encodes a parameter value for a given target OID, returning the format it
/// chose to encode in.
pub trait Encoder: Send + Sync {
    fn encode(&self, value: &Value, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode>;
}

/// Chooses the wire format PostgreSQL should use to send a given column OID.
pub trait Formatter: Send + Sync {
    fn format_for(&self, oid: Oid) -> FormatCode;
}

/// Default formatter: binary for everything except NUMERIC, matching
/// `protocol::types::preferred_format`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn format_for(&self, oid: Oid) -> FormatCode {
        crate::protocol::types::preferred_format(oid)
    }
}

/// Default decoder for the built-in primitive OIDs. Unknown OIDs fall back to
/// returning the raw bytes as a UTF-8 string, or as raw bytes if not valid
/// UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDecoder;

impl Decoder for DefaultDecoder {
    fn decode(&self, oid: Oid, format: FormatCode, bytes: Option<&[u8]>) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        match (oid, format) {
            (oid::BOOL, FormatCode::Binary) => Ok(Value::Bool(bytes.first() == Some(&1))),
            (oid::BOOL, FormatCode::Text) => Ok(Value::Bool(bytes == b"t")),
            (oid::INT2, FormatCode::Binary) => Ok(Value::Int2(read_be::<2>(bytes)? as i16)),
            (oid::INT4, FormatCode::Binary) => Ok(Value::Int4(read_be::<4>(bytes)? as i32)),
            (oid::INT8, FormatCode::Binary) => Ok(Value::Int8(read_be::<8>(bytes)? as i64)),
            (oid::FLOAT4, FormatCode::Binary) => {
                Ok(Value::Float4(f32::from_bits(read_be::<4>(bytes)? as u32)))
            }
            (oid::FLOAT8, FormatCode::Binary) => {
                Ok(Value::Float8(f64::from_bits(read_be::<8>(bytes)?)))
            }
            (oid::BYTEA, _) => Ok(Value::Bytes(bytes.to_vec())),
            (oid::INT2 | oid::INT4 | oid::INT8, FormatCode::Text) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::Decode(format!("invalid UTF-8 integer: {e}")))?;
                text.parse::<i64>()
                    .map(Value::Int8)
                    .map_err(|e| Error::Decode(format!("invalid integer literal: {e}")))
            }
            (oid::FLOAT4 | oid::FLOAT8, FormatCode::Text) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::Decode(format!("invalid UTF-8 float: {e}")))?;
                text.parse::<f64>()
                    .map(Value::Float8)
                    .map_err(|e| Error::Decode(format!("invalid float literal: {e}")))
            }
            _ => match std::str::from_utf8(bytes) {
                Ok(s) => Ok(Value::Text(s.to_owned())),
                Err(_) => Ok(Value::Bytes(bytes.to_vec())),
            },
        }
    }
}

fn read_be<const N: usize>(bytes: &[u8]) -> Result<u64> {
    if bytes.len() < N {
        return Err(Error::Decode(format!(
            "expected at least {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut acc: u64 = 0;
    for &b in &bytes[..N] {
        acc = (acc << 8) | u64::from(b);
    }
    Ok(acc)
}

/// Default encoder for the built-in primitive [`Value`] variants. Always
/// encodes in binary format; `target_oid` is accepted for parity with the
/// `Encoder` trait but the built-in encoder trusts the caller's `Value`
/// variant rather than attempting cross-OID coercion.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEncoder;

impl Encoder for DefaultEncoder {
    fn encode(&self, value: &Value, _target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
        match value {
            Value::Null => {
                buf.extend_from_slice(&(-1_i32).to_be_bytes());
            }
            Value::Bool(b) => {
                buf.extend_from_slice(&1_i32.to_be_bytes());
                buf.push(u8::from(*b));
            }
            Value::Int2(v) => {
                buf.extend_from_slice(&2_i32.to_be_bytes());
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Int4(v) => {
                buf.extend_from_slice(&4_i32.to_be_bytes());
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Int8(v) => {
                buf.extend_from_slice(&8_i32.to_be_bytes());
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float4(v) => {
                buf.extend_from_slice(&4_i32.to_be_bytes());
                buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Float8(v) => {
                buf.extend_from_slice(&8_i32.to_be_bytes());
                buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Text(s) => {
                buf.extend_from_slice(&(s.len() as i32).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                buf.extend_from_slice(&(b.len() as i32).to_be_bytes());
                buf.extend_from_slice(b);
            }
        }
        Ok(FormatCode::Binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_int4() {
        let encoder = DefaultEncoder;
        let decoder = DefaultDecoder;
        let mut buf = Vec::new();
        encoder
            .encode(&Value::Int4(42), oid::INT4, &mut buf)
            .unwrap();
        let len = i32::from_be_bytes(buf[..4].try_into().unwrap());
        assert_eq!(len, 4);
        let decoded = decoder
            .decode(oid::INT4, FormatCode::Binary, Some(&buf[4..]))
            .unwrap();
        assert_eq!(decoded, Value::Int4(42));
    }

    #[test]
    fn decodes_null() {
        let decoder = DefaultDecoder;
        assert_eq!(
            decoder
                .decode(oid::INT4, FormatCode::Binary, None)
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn unknown_oid_falls_back_to_text() {
        let decoder = DefaultDecoder;
        let decoded = decoder
            .decode(99999, FormatCode::Text, Some(b"hello"))
            .unwrap();
        assert_eq!(decoded, Value::Text("hello".into()));
    }
}
