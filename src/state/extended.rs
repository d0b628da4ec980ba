//! Extended Query protocol state machine.
//!
//! Every query always runs through the unnamed statement `""` and the
//! unnamed portal `""`: prepared-statement caching and portal pipelining are
//! out of scope, so each call is a fresh Parse+Bind+Execute+Sync round-trip.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::{
    BindComplete, CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse, NoData,
    ParameterDescription, ParseComplete, PortalSuspended, RawMessage, RowDescription, msg_type,
};
use crate::protocol::frontend::{write_bind, write_describe_statement, write_execute, write_parse, write_sync};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::query_result::{Column, QueryResult};
use crate::value::{Decoder, Encoder, Formatter, Value};

use super::StateMachine;
use super::action::{Action, AsyncMessage};
use crate::buffer_set::BufferSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingDescribe,
    WaitingParamDesc,
    WaitingBind,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// Drives a single parameterized query through Parse/Describe/Bind/Execute/
/// Sync to completion.
pub struct ExtendedQueryStateMachine {
    state: State,
    sql: String,
    params: Vec<Value>,
    param_oids: Vec<Oid>,
    /// Result column OIDs supplied by the caller up front. When non-empty
    /// (and `param_oids` was caller-supplied too), `Describe` is skipped
    /// entirely — see [`ExtendedQueryStateMachine::new_with_types`].
    result_oids: Vec<Oid>,
    skip_describe: bool,
    decoder: Arc<dyn Decoder>,
    encoder: Arc<dyn Encoder>,
    formatter: Arc<dyn Formatter>,
    result: QueryResult,
    transaction_status: TransactionStatus,
}

impl ExtendedQueryStateMachine {
    /// `sql` uses `$1`, `$2`, ... placeholders. Parameter OIDs are inferred
    /// from each `Value`'s natural OID unless the caller already knows the
    /// server's expected type.
    pub fn new(
        sql: impl Into<String>,
        params: Vec<Value>,
        decoder: Arc<dyn Decoder>,
        encoder: Arc<dyn Encoder>,
        formatter: Arc<dyn Formatter>,
    ) -> Self {
        Self::new_with_types(sql, params, Vec::new(), Vec::new(), decoder, encoder, formatter)
    }

    /// Like [`ExtendedQueryStateMachine::new`], but with caller-supplied
    /// parameter and result type OIDs. When both are non-empty, the server
    /// already knows everything `Describe` would have told us, so the
    /// `Describe` round trip is skipped and `Bind` follows `Parse` directly.
    /// Column names are unavailable on this path since they only come from
    /// `RowDescription`/`Describe`.
    pub fn new_with_types(
        sql: impl Into<String>,
        params: Vec<Value>,
        param_types: Vec<Oid>,
        result_types: Vec<Oid>,
        decoder: Arc<dyn Decoder>,
        encoder: Arc<dyn Encoder>,
        formatter: Arc<dyn Formatter>,
    ) -> Self {
        let skip_describe = !param_types.is_empty() && !result_types.is_empty();
        let param_oids = if param_types.is_empty() {
            params.iter().map(Value::natural_oid).collect()
        } else {
            param_types
        };
        Self {
            state: State::Initial,
            sql: sql.into(),
            params,
            param_oids,
            result_oids: result_types,
            skip_describe,
            decoder,
            encoder,
            formatter,
            result: QueryResult::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn into_result(self) -> QueryResult {
        self.result
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, "", &self.sql, &self.param_oids);
        self.state = State::WaitingParse;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_parse(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        ParseComplete::parse(&buffer_set.read_buffer)?;
        buffer_set.write_buffer.clear();

        if self.skip_describe {
            self.result.columns = self
                .result_oids
                .iter()
                .map(|&oid| Column { name: String::new(), oid })
                .collect();
            self.write_bind_execute_sync(buffer_set)?;
            self.state = State::WaitingBind;
            return Ok(Action::WriteAndReadMessage);
        }

        write_describe_statement(&mut buffer_set.write_buffer, "");
        self.state = State::WaitingDescribe;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_describe(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        if type_byte != msg_type::PARAMETER_DESCRIPTION {
            return Err(Error::Protocol(format!(
                "expected ParameterDescription, got '{}'",
                type_byte as char
            )));
        }
        let desc = ParameterDescription::parse(&buffer_set.read_buffer)?;
        self.param_oids = desc.oids().to_vec();
        self.state = State::WaitingParamDesc;
        Ok(Action::ReadMessage)
    }

    fn handle_param_desc_tail(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(&buffer_set.read_buffer)?;
                self.result.columns = desc
                    .iter()
                    .map(|f| Column {
                        name: f.name.to_string(),
                        oid: f.type_oid(),
                    })
                    .collect();
            }
            msg_type::NO_DATA => {
                NoData::parse(&buffer_set.read_buffer)?;
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "expected RowDescription or NoData, got '{}'",
                    type_byte as char
                )));
            }
        }

        buffer_set.write_buffer.clear();
        self.write_bind_execute_sync(buffer_set)?;
        self.state = State::WaitingBind;
        Ok(Action::WriteAndReadMessage)
    }

    fn write_bind_execute_sync(&self, buffer_set: &mut BufferSet) -> Result<()> {
        let result_formats: Vec<_> = self
            .result
            .columns
            .iter()
            .map(|c| self.formatter.format_for(c.oid))
            .collect();

        write_bind(
            &mut buffer_set.write_buffer,
            "",
            "",
            self.encoder.as_ref(),
            &self.params,
            &self.param_oids,
            &result_formats,
        )?;
        write_execute(&mut buffer_set.write_buffer, "", 0);
        write_sync(&mut buffer_set.write_buffer);
        Ok(())
    }

    fn handle_bind(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        BindComplete::parse(&buffer_set.read_buffer)?;
        self.state = State::ProcessingRows;
        Ok(Action::ReadMessage)
    }

    fn handle_rows(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                let mut values = Vec::with_capacity(row.len());
                for (i, col) in row.iter().enumerate() {
                    let oid = self.result.columns[i].oid;
                    let format = self.formatter.format_for(oid);
                    values.push(self.decoder.decode(oid, format, col)?);
                }
                self.result.rows.push(values);
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.result.tag = complete.tag.to_string();
                self.result.num_rows = complete.rows_affected().unwrap_or(0);
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::PORTAL_SUSPENDED => {
                // Paging isn't implemented; a suspended portal is treated as
                // completion with whatever rows arrived so far.
                PortalSuspended::parse(payload)?;
                self.result.num_rows = self.result.rows.len() as u64;
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            _ => Err(Error::Protocol(format!(
                "unexpected message while reading rows: '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        if type_byte != msg_type::READY_FOR_QUERY {
            return Err(Error::Protocol(format!(
                "expected ReadyForQuery, got '{}'",
                type_byte as char
            )));
        }
        let ready = crate::protocol::backend::ReadyForQuery::parse(&buffer_set.read_buffer)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = State::Finished;
        Ok(Action::Finished)
    }

    fn handle_async_message(&self, msg: &RawMessage<'_>) -> Result<Action> {
        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = crate::protocol::backend::NoticeResponse::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::Notice(notice.0),
                ))
            }
            msg_type::PARAMETER_STATUS => {
                let param = crate::protocol::backend::ParameterStatus::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::ParameterChanged {
                        name: param.name.to_string(),
                        value: param.value.to_string(),
                    },
                ))
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification =
                    crate::protocol::backend::NotificationResponse::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::Notification {
                        pid: notification.pid,
                        channel: notification.channel.to_string(),
                        payload: notification.payload.to_string(),
                    },
                ))
            }
            _ => Err(Error::Protocol(format!(
                "unknown async message type: '{}'",
                msg.type_byte as char
            ))),
        }
    }
}

impl StateMachine for ExtendedQueryStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            return self.handle_initial(buffer_set);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = RawMessage::new(type_byte, &buffer_set.read_buffer);
            return self.handle_async_message(&msg);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return Err(error.into_error());
        }

        match self.state {
            State::WaitingParse => self.handle_parse(buffer_set),
            State::WaitingDescribe => self.handle_describe(buffer_set),
            State::WaitingParamDesc => self.handle_param_desc_tail(buffer_set),
            State::WaitingBind => self.handle_bind(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
            State::WaitingReady => self.handle_ready(buffer_set),
            State::Initial | State::Finished => {
                Err(Error::Protocol(format!("unexpected state {:?}", self.state)))
            }
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DefaultDecoder, DefaultEncoder, DefaultFormatter};

    #[test]
    fn starts_with_parse() {
        let mut sm = ExtendedQueryStateMachine::new(
            "SELECT $1::int4",
            vec![Value::Int4(7)],
            Arc::new(DefaultDecoder),
            Arc::new(DefaultEncoder),
            Arc::new(DefaultFormatter),
        );
        let mut buffer_set = BufferSet::new();
        let action = sm.step(&mut buffer_set).unwrap();
        assert!(matches!(action, Action::WriteAndReadMessage));
        assert_eq!(buffer_set.write_buffer[0], b'P');
    }

    #[test]
    fn skips_describe_when_both_type_lists_are_supplied() {
        use crate::protocol::types::oid;

        let mut sm = ExtendedQueryStateMachine::new_with_types(
            "SELECT $1::int4",
            vec![Value::Int4(7)],
            vec![oid::INT4],
            vec![oid::INT4],
            Arc::new(DefaultDecoder),
            Arc::new(DefaultEncoder),
            Arc::new(DefaultFormatter),
        );
        let mut buffer_set = BufferSet::new();
        sm.step(&mut buffer_set).unwrap();

        buffer_set.type_byte = msg_type::PARSE_COMPLETE;
        buffer_set.read_buffer.clear();
        let action = sm.step(&mut buffer_set).unwrap();

        assert!(matches!(action, Action::WriteAndReadMessage));
        assert_eq!(buffer_set.write_buffer[0], b'B');
        assert_eq!(sm.result.columns.len(), 1);
        assert_eq!(sm.result.columns[0].oid, oid::INT4);
    }
}
