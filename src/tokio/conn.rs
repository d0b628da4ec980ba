//! Connection Supervisor (C5): owns the socket, drives the protocol state
//! machines, routes client calls through the request queue, and fans
//! `NOTIFY`/`ParameterStatus` traffic out while idle as well as mid-query.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::listener::{ListenerRegistry, Notification, SubscriberId};
use crate::opts::Opts;
use crate::protocol::backend::{msg_type, NoticeResponse, NotificationResponse, ParameterStatus, RawMessage};
use crate::protocol::types::Oid;
use crate::query_result::QueryResult;
use crate::queue::{Request, RequestPayload, RequestQueue};
use crate::state::action::{Action, AsyncMessage};
use crate::state::{ConnectionStateMachine, ExtendedQueryStateMachine, SimpleQueryStateMachine, StateMachine};
use crate::value::Value;

use super::stream::Stream;

/// Type registry bootstrap query, run once before the connection is handed
/// to callers. Its result is discarded; only the round-trip matters.
const BOOTSTRAP_QUERY: &str =
    "SELECT oid, typname, typtype, typbasetype FROM pg_type UNION ALL \
     SELECT rngtypid, 'range', 'r', rngsubtype FROM pg_range";

/// A call coming in on the client's handle.
enum ClientMsg {
    Query {
        sql: String,
        params: Vec<Value>,
        param_types: Vec<Oid>,
        result_types: Vec<Oid>,
        reply: oneshot::Sender<Result<QueryResult>>,
    },
    Listen {
        channel: String,
        sender: mpsc::UnboundedSender<Notification>,
        reply: oneshot::Sender<Result<SubscriberId>>,
    },
    Unlisten {
        id: SubscriberId,
        reply: oneshot::Sender<Result<()>>,
    },
    Parameters {
        reply: oneshot::Sender<HashMap<String, String>>,
    },
}

/// A thin handle to a connection running on a background task.
///
/// Cloning shares the same underlying connection; once every clone is
/// dropped the Supervisor task exits.
#[derive(Clone)]
pub struct Conn {
    tx: mpsc::UnboundedSender<ClientMsg>,
}

impl Conn {
    /// Connect to the server, run startup/authentication and the type
    /// registry bootstrap, then spawn the Supervisor task.
    pub async fn connect(opts: Opts) -> Result<Self> {
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port))
            .await
            .map_err(|e| Error::Connect(format!("{e}")))?;
        let stream = Stream::tcp(tcp);
        let mut buffer_set = BufferSet::new();

        let mut stream = run_handshake(stream, &mut buffer_set, &opts).await?;

        let mut bootstrap = SimpleQueryStateMachine::new(BOOTSTRAP_QUERY, opts.decoder.clone());
        run_query_machine(&mut stream, &mut buffer_set, &mut bootstrap, &mut |_| {}).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(supervisor_loop(stream, buffer_set, opts, rx));

        Ok(Self { tx })
    }

    /// Run a query to completion: parameterized via the Extended Query
    /// protocol when `params` is non-empty, Simple Query protocol otherwise.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.query_typed(sql, params, &[], &[]).await
    }

    /// Like [`Conn::query`], but with caller-supplied parameter/result type
    /// OIDs. When both are non-empty (and `params` is non-empty), the
    /// Extended Query protocol's `Describe` round trip is skipped.
    pub async fn query_typed(
        &self,
        sql: &str,
        params: &[Value],
        param_types: &[Oid],
        result_types: &[Oid],
    ) -> Result<QueryResult> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ClientMsg::Query {
                sql: sql.to_string(),
                params: params.to_vec(),
                param_types: param_types.to_vec(),
                result_types: result_types.to_vec(),
                reply,
            })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Subscribe to a `LISTEN` channel. Notifications arrive on the returned
    /// receiver until [`Conn::unlisten`] is called or the receiver is dropped.
    pub async fn listen(
        &self,
        channel: &str,
    ) -> Result<(SubscriberId, mpsc::UnboundedReceiver<Notification>)> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ClientMsg::Listen {
                channel: channel.to_string(),
                sender,
                reply,
            })
            .map_err(|_| Error::Closed)?;
        let id = rx.await.map_err(|_| Error::Closed)??;
        Ok((id, receiver))
    }

    /// Cancel a subscription created by [`Conn::listen`]. Returns
    /// `Error::Argument` if `id` is unknown (never issued, or already
    /// unlistened).
    pub async fn unlisten(&self, id: SubscriberId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ClientMsg::Unlisten { id, reply })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Snapshot of every `ParameterStatus` the server has reported so far
    /// (the values set at startup, plus any since latched in by `SET`).
    pub async fn parameters(&self) -> Result<HashMap<String, String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ClientMsg::Parameters { reply })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

async fn run_handshake(mut stream: Stream, buffer_set: &mut BufferSet, opts: &Opts) -> Result<Stream> {
    let mut sm = ConnectionStateMachine::new(opts.clone());
    loop {
        let action = sm.step(buffer_set)?;
        match action {
            Action::Write => {
                stream.write_all(&buffer_set.write_buffer).await?;
                stream.flush().await?;
            }
            Action::WriteAndReadMessage => {
                stream.write_all(&buffer_set.write_buffer).await?;
                stream.flush().await?;
                stream.read_message(buffer_set).await?;
            }
            Action::ReadMessage => {
                stream.read_message(buffer_set).await?;
            }
            Action::WriteAndReadByte => {
                stream.write_all(&buffer_set.write_buffer).await?;
                stream.flush().await?;
                let byte = stream.read_u8().await?;
                sm.set_ssl_response(byte);
            }
            Action::TlsHandshake => {
                #[cfg(feature = "tokio-tls")]
                {
                    stream = stream.upgrade_to_tls(&opts.host).await?;
                }
                #[cfg(not(feature = "tokio-tls"))]
                {
                    return Err(Error::Connect(
                        "server requested TLS but the tokio-tls feature is disabled".into(),
                    ));
                }
            }
            Action::HandleAsyncMessageAndReadMessage(msg) => {
                log_startup_async(&msg);
                stream.read_message(buffer_set).await?;
            }
            Action::Finished => return Ok(stream),
        }
    }
}

fn log_startup_async(msg: &AsyncMessage) {
    match msg {
        AsyncMessage::Notice(notice) => tracing::debug!(%notice, "notice during startup"),
        AsyncMessage::ParameterChanged { name, value } => {
            tracing::debug!(name, value, "parameter changed during startup");
        }
        AsyncMessage::Notification { channel, .. } => {
            tracing::debug!(channel, "notification during startup, dropped");
        }
    }
}

/// Drive a query state machine (simple or extended) to completion, routing
/// async messages through `on_async`.
async fn run_query_machine<S: StateMachine>(
    stream: &mut Stream,
    buffer_set: &mut BufferSet,
    sm: &mut S,
    on_async: &mut impl FnMut(AsyncMessage),
) -> Result<()> {
    loop {
        let action = sm.step(buffer_set)?;
        match action {
            Action::Write => {
                stream.write_all(&buffer_set.write_buffer).await?;
                stream.flush().await?;
            }
            Action::WriteAndReadMessage => {
                stream.write_all(&buffer_set.write_buffer).await?;
                stream.flush().await?;
                stream.read_message(buffer_set).await?;
            }
            Action::ReadMessage => {
                stream.read_message(buffer_set).await?;
            }
            Action::HandleAsyncMessageAndReadMessage(msg) => {
                on_async(msg);
                stream.read_message(buffer_set).await?;
            }
            Action::Finished => return Ok(()),
            Action::WriteAndReadByte | Action::TlsHandshake => {
                return Err(Error::Protocol(
                    "unexpected SSL negotiation action outside startup".into(),
                ));
            }
        }
    }
}

/// Send `LISTEN`/`UNLISTEN` as a bare Simple Query. Channel names are
/// interpolated unquoted, matching this engine's preserved wire-level
/// behavior (see the design notes on unquoted channel names).
async fn run_listen_command(
    stream: &mut Stream,
    buffer_set: &mut BufferSet,
    sql: String,
    parameters: &mut HashMap<String, String>,
) -> Result<()> {
    let mut sm = SimpleQueryStateMachine::new(sql, Arc::new(crate::value::DefaultDecoder));
    run_query_machine(stream, buffer_set, &mut sm, &mut |msg| {
        record_parameter_change(parameters, &msg);
    })
    .await
}

fn record_parameter_change(parameters: &mut HashMap<String, String>, msg: &AsyncMessage) {
    if let AsyncMessage::ParameterChanged { name, value } = msg {
        parameters.insert(name.clone(), value.clone());
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one_query(
    stream: &mut Stream,
    buffer_set: &mut BufferSet,
    opts: &Opts,
    listeners: &mut ListenerRegistry,
    parameters: &mut HashMap<String, String>,
    sql: &str,
    params: &[Value],
    param_types: &[Oid],
    result_types: &[Oid],
) -> Result<QueryResult> {
    let mut on_async = |msg: AsyncMessage| {
        record_parameter_change(parameters, &msg);
        if let AsyncMessage::Notification { pid, channel, payload } = msg {
            listeners.dispatch(Notification { pid, channel, payload });
        }
    };

    if params.is_empty() {
        let mut sm = SimpleQueryStateMachine::new(sql, opts.decoder.clone());
        run_query_machine(stream, buffer_set, &mut sm, &mut on_async).await?;
        Ok(sm.into_result())
    } else {
        let mut sm = ExtendedQueryStateMachine::new_with_types(
            sql,
            params.to_vec(),
            param_types.to_vec(),
            result_types.to_vec(),
            opts.decoder.clone(),
            opts.encoder.clone(),
            opts.formatter.clone(),
        );
        run_query_machine(stream, buffer_set, &mut sm, &mut on_async).await?;
        Ok(sm.into_result())
    }
}

/// Parse and dispatch one async message (`NotificationResponse`,
/// `ParameterStatus`, `NoticeResponse`) that arrived while the connection was
/// idle, i.e. outside any `run_query_machine` call.
fn dispatch_idle_async_message(
    buffer_set: &BufferSet,
    listeners: &mut ListenerRegistry,
    parameters: &mut HashMap<String, String>,
) -> Result<()> {
    let type_byte = buffer_set.type_byte;
    let msg = RawMessage::new(type_byte, &buffer_set.read_buffer);
    if !RawMessage::is_async_type(type_byte) {
        return Err(Error::Protocol(format!(
            "unexpected message while idle: '{}'",
            type_byte as char
        )));
    }

    match msg.type_byte {
        msg_type::NOTICE_RESPONSE => {
            NoticeResponse::parse(msg.payload)?;
        }
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(msg.payload)?;
            parameters.insert(param.name.to_string(), param.value.to_string());
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(msg.payload)?;
            listeners.dispatch(Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            });
        }
        _ => unreachable!("is_async_type already filtered to these three"),
    }
    Ok(())
}

async fn supervisor_loop(
    mut stream: Stream,
    mut buffer_set: BufferSet,
    opts: Opts,
    mut rx: mpsc::UnboundedReceiver<ClientMsg>,
) {
    let mut listeners = ListenerRegistry::new();
    let mut queue = RequestQueue::new();
    let mut parameters: HashMap<String, String> = HashMap::new();

    loop {
        let msg = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
            readable = stream.readable() => {
                if let Err(err) = readable {
                    queue.fail_all(Error::Io(err));
                    return;
                }
                if let Err(err) = stream.read_message(&mut buffer_set).await {
                    queue.fail_all(err.into());
                    return;
                }
                if let Err(err) = dispatch_idle_async_message(&buffer_set, &mut listeners, &mut parameters) {
                    let fatal = err.is_fatal();
                    queue.fail_all(err);
                    if fatal {
                        return;
                    }
                }
                continue;
            },
        };

        match msg {
            ClientMsg::Query { sql, params, param_types, result_types, reply } => {
                queue.push_back(Request::new(
                    RequestPayload::Query { sql, params, param_types, result_types },
                    reply,
                ));
            }
            ClientMsg::Listen { channel, sender, reply } => {
                let (id, needs_listen) = listeners.listen(&channel, sender);
                if needs_listen {
                    let sql = format!("LISTEN {channel}");
                    if let Err(err) =
                        run_listen_command(&mut stream, &mut buffer_set, sql, &mut parameters).await
                    {
                        let _ = reply.send(Err(err.clone()));
                        queue.fail_all(err);
                        return;
                    }
                }
                let _ = reply.send(Ok(id));
                continue;
            }
            ClientMsg::Unlisten { id, reply } => {
                match listeners.unlisten(id) {
                    Ok(Some(channel)) => {
                        let sql = format!("UNLISTEN {channel}");
                        if let Err(err) =
                            run_listen_command(&mut stream, &mut buffer_set, sql, &mut parameters).await
                        {
                            let _ = reply.send(Err(err.clone()));
                            queue.fail_all(err);
                            return;
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Ok(None) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        // Caller-side mistake (unknown handle), not fatal to
                        // the connection: report it and keep serving.
                        let _ = reply.send(Err(err));
                    }
                }
                continue;
            }
            ClientMsg::Parameters { reply } => {
                let _ = reply.send(parameters.clone());
                continue;
            }
        }

        let Some(head) = queue.peek() else { continue };
        let (sql, params, param_types, result_types) = match &head.payload {
            RequestPayload::Query { sql, params, param_types, result_types } => {
                (sql.clone(), params.clone(), param_types.clone(), result_types.clone())
            }
            RequestPayload::Listen { .. } | RequestPayload::Unlisten { .. } => {
                // Not reachable today: Listen/Unlisten are handled via the
                // dedicated ClientMsg arms above rather than queued.
                queue.complete_head(Ok(QueryResult::new()));
                continue;
            }
        };

        let result = run_one_query(
            &mut stream,
            &mut buffer_set,
            &opts,
            &mut listeners,
            &mut parameters,
            &sql,
            &params,
            &param_types,
            &result_types,
        )
        .await;
        let fatal = result.as_ref().err().is_some_and(Error::is_fatal);
        queue.complete_head(result);

        if fatal {
            queue.fail_all(Error::Closed);
            return;
        }
    }
}
