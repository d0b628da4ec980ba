//! The result shape delivered to callers for both query protocols.

use crate::protocol::types::Oid;
use crate::value::Value;

/// Metadata for a single result column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub oid: Oid,
}

/// The outcome of running a query to completion.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub tag: String,
    pub num_rows: u64,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }
}
