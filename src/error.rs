//! Error types for the connection engine.

use std::collections::HashMap;
use thiserror::Error;

/// Result type for connection-engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error field type codes.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_V: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// A PostgreSQL `ErrorResponse`/`NoticeResponse` message, with accessors for
/// the well-known fields.
#[derive(Debug, Clone, Default)]
pub struct ServerError(pub(crate) HashMap<u8, String>);

impl ServerError {
    /// Build from the raw field-code -> value map parsed off the wire.
    pub fn new(fields: HashMap<u8, String>) -> Self {
        Self(fields)
    }

    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG.
    pub fn severity(&self) -> &str {
        self.0
            .get(&field_type::SEVERITY)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Severity (never translated, PostgreSQL 9.6+).
    pub fn severity_v(&self) -> &str {
        self.0
            .get(&field_type::SEVERITY_V)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// SQLSTATE error code (5 characters).
    pub fn code(&self) -> &str {
        self.0
            .get(&field_type::CODE)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Primary error message.
    pub fn message(&self) -> &str {
        self.0
            .get(&field_type::MESSAGE)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Detailed error explanation.
    pub fn detail(&self) -> Option<&str> {
        self.0.get(&field_type::DETAIL).map(String::as_str)
    }

    /// Suggestion for fixing the error.
    pub fn hint(&self) -> Option<&str> {
        self.0.get(&field_type::HINT).map(String::as_str)
    }

    /// Cursor position in the query string (1-based).
    pub fn position(&self) -> Option<u32> {
        self.0
            .get(&field_type::POSITION)
            .and_then(|s| s.parse().ok())
    }

    /// Schema name.
    pub fn schema(&self) -> Option<&str> {
        self.0.get(&field_type::SCHEMA).map(String::as_str)
    }

    /// Table name.
    pub fn table(&self) -> Option<&str> {
        self.0.get(&field_type::TABLE).map(String::as_str)
    }

    /// Column name.
    pub fn column(&self) -> Option<&str> {
        self.0.get(&field_type::COLUMN).map(String::as_str)
    }

    /// Constraint name.
    pub fn constraint(&self) -> Option<&str> {
        self.0.get(&field_type::CONSTRAINT).map(String::as_str)
    }

    /// Get a field by its wire type code.
    pub fn get(&self, field_type: u8) -> Option<&str> {
        self.0.get(&field_type).map(String::as_str)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code()
        )?;
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Error type for the connection engine.
///
/// Variants correspond to the five error kinds the engine distinguishes:
/// connection-establishment failure, authentication rejection, wire-protocol
/// violation, a server-reported `ErrorResponse` attached to a query, and a
/// locally-detected invalid argument from the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// TCP connect, TLS handshake, or pre-authentication protocol failure.
    #[error("connect error: {0}")]
    Connect(String),

    /// Authentication rejected or unsupported.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Out-of-sequence message, unparseable frame, or phase/message mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `ErrorResponse` received in a query context.
    #[error("{0}")]
    Server(ServerError),

    /// Caller supplied an invalid argument (e.g. `unlisten` with an unknown handle).
    #[error("invalid argument: {0}")]
    Argument(String),

    /// I/O error talking to the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error.
    #[cfg(feature = "tokio-tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Value decode error (column value did not match the requested shape).
    #[error("decode error: {0}")]
    Decode(String),

    /// The connection has already terminated and cannot accept new requests.
    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Whether this error means the connection can no longer be used and the
    /// Supervisor must terminate, replying this same error to every queued
    /// request.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connect(_) | Error::Auth(_) | Error::Protocol(_) | Error::Io(_) => true,
            #[cfg(feature = "tokio-tls")]
            Error::Tls(_) => true,
            Error::Server(err) => matches!(err.severity_v(), "FATAL" | "PANIC"),
            Error::Argument(_) | Error::Decode(_) | Error::Closed => false,
        }
    }

    /// SQLSTATE code, if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.code()),
            _ => None,
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

impl Clone for Error {
    /// Fatal errors must be replayed to every queued caller; since
    /// `std::io::Error` and `native_tls::Error` are not `Clone`, those are
    /// downgraded to their string rendering when cloned.
    fn clone(&self) -> Self {
        match self {
            Error::Connect(s) => Error::Connect(s.clone()),
            Error::Auth(s) => Error::Auth(s.clone()),
            Error::Protocol(s) => Error::Protocol(s.clone()),
            Error::Server(e) => Error::Server(e.clone()),
            Error::Argument(s) => Error::Argument(s.clone()),
            Error::Io(e) => Error::Connect(format!("I/O error: {e}")),
            #[cfg(feature = "tokio-tls")]
            Error::Tls(e) => Error::Connect(format!("TLS error: {e}")),
            Error::Decode(s) => Error::Decode(s.clone()),
            Error::Closed => Error::Closed,
        }
    }
}
