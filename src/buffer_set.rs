//! Buffer set for state machine operations.

/// Scratch buffers shared between the I/O driver and a `StateMachine`.
pub struct BufferSet {
    /// Read buffer holding the payload of the last message read.
    pub read_buffer: Vec<u8>,
    /// Write buffer the state machine fills in; the driver writes its
    /// contents to the socket on `Action::Write`/`Action::WriteAndRead*`.
    pub write_buffer: Vec<u8>,
    /// Holds the most recent `RowDescription` payload so `DataRow` callbacks
    /// can resolve column metadata without re-reading it.
    pub column_buffer: Vec<u8>,
    /// Type byte of the last message read.
    pub type_byte: u8,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(4096),
            column_buffer: Vec::with_capacity(256),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
