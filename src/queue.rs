//! Request queue (C3): FIFO of pending requests with their reply
//! destinations, guaranteeing at most one in-flight request at a time.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::query_result::QueryResult;

/// What the Supervisor does in response to a completed request.
pub enum RequestPayload {
    Query {
        sql: String,
        params: Vec<crate::value::Value>,
        /// Caller-supplied parameter and result type OIDs. When both are
        /// non-empty, the Extended Query protocol's `Describe` round trip
        /// is skipped (the caller already knows what it would report).
        param_types: Vec<Oid>,
        result_types: Vec<Oid>,
    },
    Listen { channel: String },
    Unlisten { channel: String },
}

/// An entry in the queue: the work to do and where to send the result.
///
/// `reply_to` is `None` for internally-injected requests (the bootstrap
/// query, or an `UNLISTEN` synthesized when a subscriber's channel drops) —
/// their result is discarded rather than delivered to a caller.
pub struct Request {
    pub payload: RequestPayload,
    pub reply_to: Option<oneshot::Sender<Result<QueryResult>>>,
}

impl Request {
    pub fn new(payload: RequestPayload, reply_to: oneshot::Sender<Result<QueryResult>>) -> Self {
        Self {
            payload,
            reply_to: Some(reply_to),
        }
    }

    /// Build a request with no caller to reply to.
    pub fn internal(payload: RequestPayload) -> Self {
        Self {
            payload,
            reply_to: None,
        }
    }

    /// Deliver a result, discarding it silently if this was internal or the
    /// caller already dropped its receiver.
    pub fn complete(self, result: Result<QueryResult>) {
        if let Some(tx) = self.reply_to {
            let _ = tx.send(result);
        }
    }
}

/// FIFO queue of pending requests.
///
/// The head is peeked (not popped) while a request is in flight so that an
/// error arriving mid-query can still be attached to it; it is popped only
/// once the Supervisor has delivered a result. `push_front` supports
/// injecting synthetic requests (the bootstrap query, cleanup `UNLISTEN`s)
/// ahead of whatever is already queued.
#[derive(Default)]
pub struct RequestQueue {
    items: VecDeque<Request>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push_back(&mut self, request: Request) {
        self.items.push_back(request);
    }

    /// Inject a request ahead of the queue.
    pub fn push_front(&mut self, request: Request) {
        self.items.push_front(request);
    }

    pub fn peek(&self) -> Option<&Request> {
        self.items.front()
    }

    /// Remove and return the head, delivering `result` to its caller.
    pub fn complete_head(&mut self, result: Result<QueryResult>) {
        if let Some(request) = self.items.pop_front() {
            request.complete(result);
        }
    }

    /// Drain every queued request (including the head), delivering `err` to
    /// each caller. Used when the connection dies and all pending work must
    /// be failed.
    pub fn fail_all(&mut self, err: Error) {
        while let Some(request) = self.items.pop_front() {
            request.complete(Err(err.clone()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_payload() -> RequestPayload {
        RequestPayload::Query {
            sql: "SELECT 1".into(),
            params: Vec::new(),
            param_types: Vec::new(),
            result_types: Vec::new(),
        }
    }

    #[tokio::test]
    async fn completes_head_in_fifo_order() {
        let mut queue = RequestQueue::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        queue.push_back(Request::new(dummy_payload(), tx1));
        queue.push_back(Request::new(dummy_payload(), tx2));

        queue.complete_head(Ok(QueryResult::new()));
        assert!(rx1.await.unwrap().is_ok());
        assert_eq!(queue.len(), 1);

        queue.complete_head(Err(Error::Closed));
        assert!(rx2.await.unwrap().is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn push_front_injects_ahead_of_existing_head() {
        let mut queue = RequestQueue::new();
        let (tx_user, _rx_user) = oneshot::channel();
        queue.push_back(Request::new(dummy_payload(), tx_user));
        queue.push_front(Request::internal(RequestPayload::Unlisten {
            channel: "foo".into(),
        }));

        assert!(matches!(
            queue.peek().unwrap().payload,
            RequestPayload::Unlisten { .. }
        ));
    }

    #[tokio::test]
    async fn fail_all_delivers_to_every_caller() {
        let mut queue = RequestQueue::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        queue.push_back(Request::new(dummy_payload(), tx1));
        queue.push_back(Request::new(dummy_payload(), tx2));

        queue.fail_all(Error::Closed);
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
    }
}
