//! A PostgreSQL connection engine: the wire-protocol state machine, request
//! queue, and listener registry underneath a client, without connection
//! pooling, automatic reconnection, or transaction management.
//!
//! # Example
//!
//! ```no_run
//! use pgwire_engine::Opts;
//! use pgwire_engine::tokio::Conn;
//!
//! # async fn run() -> pgwire_engine::Result<()> {
//! let opts = Opts {
//!     host: "localhost".into(),
//!     user: "postgres".into(),
//!     database: Some("mydb".into()),
//!     password: Some("secret".into()),
//!     ..Default::default()
//! };
//!
//! let conn = Conn::connect(opts).await?;
//! let result = conn.query("SELECT 1", &[]).await?;
//! println!("{:?}", result.rows);
//! # Ok(())
//! # }
//! ```

// private
mod buffer_set;
mod error;
mod framer;
mod listener;
mod opts;
mod query_result;
mod queue;
mod value;

// pub
pub mod protocol;
pub mod state;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_set::BufferSet;
pub use error::{Error, Result, ServerError};
pub use framer::{Frame, Framer};
pub use listener::{ListenerRegistry, Notification, SubscriberId};
pub use opts::{Opts, SslMode};
pub use query_result::{Column, QueryResult};
pub use queue::{Request, RequestPayload, RequestQueue};
pub use state::action::AsyncMessage;
pub use value::{DefaultDecoder, DefaultEncoder, DefaultFormatter, Decoder, Encoder, Formatter, Value};
