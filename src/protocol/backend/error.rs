//! Error and notice response messages.

use std::collections::HashMap;

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Parse the field-code -> value map shared by `ErrorResponse` and
/// `NoticeResponse`.
fn parse_fields(payload: &[u8]) -> Result<HashMap<u8, String>> {
    let mut fields = HashMap::new();
    let mut data = payload;

    while !data.is_empty() && data[0] != 0 {
        let field_type = data[0];
        data = &data[1..];

        let (value, rest) = read_cstr(data)?;
        data = rest;

        fields.insert(field_type, value.to_string());
    }

    Ok(fields)
}

/// `ErrorResponse` message - fatal error from the server.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    /// Parse an `ErrorResponse` message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(ServerError::new(parse_fields(payload)?)))
    }

    /// Convert to an `Error::Server`.
    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// `NoticeResponse` message - non-fatal warning/info from the server.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    /// Parse a `NoticeResponse` message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(ServerError::new(parse_fields(payload)?)))
    }
}
