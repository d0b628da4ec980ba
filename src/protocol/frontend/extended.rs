//! Extended query protocol messages.

use crate::error::Result;
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};
use crate::value::{Encoder, Value};

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for the unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// - `portal`: Portal name (empty string for the unnamed portal)
/// - `statement`: Statement name
/// - `params`: Parameter values, encoded via `encoder` against `param_oids`
/// - `result_formats`: Format codes requested for the returned columns
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    encoder: &dyn Encoder,
    params: &[Value],
    param_oids: &[Oid],
    result_formats: &[FormatCode],
) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // Encode parameter payloads first so we know which format each used.
    let mut formats = Vec::with_capacity(params.len());
    let mut payload = Vec::new();
    for (value, &target_oid) in params.iter().zip(param_oids) {
        formats.push(encoder.encode(value, target_oid, &mut payload)?);
    }

    msg.write_i16(formats.len() as i16);
    for fmt in &formats {
        msg.write_i16(*fmt as i16);
    }

    msg.write_i16(params.len() as i16);
    msg.buf().extend_from_slice(&payload);

    msg.write_i16(result_formats.len() as i16);
    for &fmt in result_formats {
        msg.write_i16(fmt as i16);
    }

    msg.finish();
    Ok(())
}

/// Write an Execute message to run a portal.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

/// Write a Describe message to get metadata.
///
/// - `describe_type`: 'S' for statement, 'P' for portal
/// - `name`: Statement or portal name
pub fn write_describe(buf: &mut Vec<u8>, describe_type: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(describe_type);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Describe message for a statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'S', name);
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'P', name);
}

/// Write a Sync message.
///
/// Ends an extended query sequence; the server responds with `ReadyForQuery`.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::value::DefaultEncoder;

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "", "SELECT $1::int", &[oid::INT4]);

        assert_eq!(buf[0], b'P');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'S');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);

        assert_eq!(buf[0], b'E');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 9);
    }

    #[test]
    fn test_bind_roundtrips_param_count() {
        let mut buf = Vec::new();
        let encoder = DefaultEncoder;
        write_bind(
            &mut buf,
            "",
            "",
            &encoder,
            &[Value::Int4(42)],
            &[oid::INT4],
            &[FormatCode::Binary],
        )
        .unwrap();
        assert_eq!(buf[0], b'B');
    }
}
