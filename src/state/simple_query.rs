//! Simple Query protocol state machine.
//!
//! Used for the type-registry bootstrap query, `LISTEN`/`UNLISTEN`, and any
//! query with no parameters and no type hints.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RawMessage, RowDescription, msg_type,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::query_result::{Column, QueryResult};
use crate::value::Decoder;

use super::StateMachine;
use super::action::{Action, AsyncMessage};
use crate::buffer_set::BufferSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// Drives a single `Query` message (the Simple Query protocol) to
/// completion, accumulating the result into a [`QueryResult`].
///
/// Unlike the Extended Query protocol, the Simple Query protocol has no
/// `Bind` step and no per-column result-format negotiation: the server
/// always sends `DataRow` values in text format. There is no `Formatter`
/// here for that reason — it only applies to Extended Query's `Bind`.
pub struct SimpleQueryStateMachine {
    state: State,
    sql: String,
    decoder: Arc<dyn Decoder>,
    result: QueryResult,
    transaction_status: TransactionStatus,
}

impl SimpleQueryStateMachine {
    pub fn new(sql: impl Into<String>, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            state: State::Initial,
            sql: sql.into(),
            decoder,
            result: QueryResult::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Take the accumulated result. Only meaningful once [`StateMachine::step`]
    /// has returned `Action::Finished`.
    pub fn into_result(self) -> QueryResult {
        self.result
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, &self.sql);
        self.state = State::WaitingResponse;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_response(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(payload)?;
                self.result.columns = desc
                    .iter()
                    .map(|f| Column {
                        name: f.name.to_string(),
                        oid: f.type_oid(),
                    })
                    .collect();
                self.state = State::ProcessingRows;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => self.handle_command_complete(payload),
            msg_type::EMPTY_QUERY_RESPONSE => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            _ => Err(Error::Protocol(format!(
                "unexpected message in simple query response: '{}'",
                type_byte as char
            ))),
        }
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
                    values.push(self.decoder.decode(oid, FormatCode::Text, col)?);
                }
                self.result.rows.push(values);
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => self.handle_command_complete(payload),
            _ => Err(Error::Protocol(format!(
                "unexpected message while reading rows: '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_command_complete(&mut self, payload: &[u8]) -> Result<Action> {
        let complete = CommandComplete::parse(payload)?;
        self.result.tag = complete.tag.to_string();
        self.result.num_rows = complete.rows_affected().unwrap_or(0);
        self.state = State::WaitingReady;
        Ok(Action::ReadMessage)
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

impl StateMachine for SimpleQueryStateMachine {
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
            State::WaitingResponse => self.handle_response(buffer_set),
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
    use crate::value::DefaultDecoder;

    #[test]
    fn starts_by_writing_the_query() {
        let mut sm = SimpleQueryStateMachine::new("SELECT 1", Arc::new(DefaultDecoder));
        let mut buffer_set = BufferSet::new();
        let action = sm.step(&mut buffer_set).unwrap();
        assert!(matches!(action, Action::WriteAndReadMessage));
        assert_eq!(buffer_set.write_buffer[0], b'Q');
    }

    #[test]
    fn rejects_error_response() {
        let mut sm = SimpleQueryStateMachine::new("garbage", Arc::new(DefaultDecoder));
        let mut buffer_set = BufferSet::new();
        sm.step(&mut buffer_set).unwrap();
        sm.state = State::WaitingResponse;

        buffer_set.type_byte = msg_type::ERROR_RESPONSE;
        buffer_set.read_buffer = {
            let mut payload = vec![b'S'];
            payload.extend_from_slice(b"ERROR\0");
            payload.push(b'C');
            payload.extend_from_slice(b"42601\0");
            payload.push(b'M');
            payload.extend_from_slice(b"syntax error\0");
            payload.push(0);
            payload
        };
        let result = sm.step(&mut buffer_set);
        assert!(result.is_err());
    }
}
