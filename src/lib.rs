//! Async STOMP client over raw byte streams and SockJS-style message channels.
//!
//! ```no_run
//! use stompwire::{AckMode, ConnectOptions, Connection};
//!
//! # async fn demo() -> Result<(), stompwire::ConnError> {
//! let options = ConnectOptions::default().login("guest", "guest");
//! let conn = Connection::connect_with_options("127.0.0.1:61613", options).await?;
//!
//! let mut sub = conn.subscribe("/queue/jobs", AckMode::ClientIndividual).await?;
//! conn.send("/queue/jobs", "text/plain", "hello").await?;
//!
//! let message = sub.next_message().await?;
//! sub.ack(&message).await?;
//! conn.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod options;
pub mod parser;
pub mod sockjs;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub use codec::{StompCodec, StompItem};
pub use connection::{
    AckMode, ConnError, Connection, ConnectionState, Fault, Receipt, negotiate_heartbeats,
    negotiate_version, parse_heartbeat_header,
};
pub use error::{FrameError, ServerError};
pub use frame::{Command, Frame, Headers};
pub use options::{CodecKind, ConnectOptions, Heartbeat, Version};
pub use sockjs::{SockJsCodec, SockJsFramed};
pub use subscription::{Subscription, SubscriptionOptions};
pub use transaction::{Transaction, TransactionState};
pub use transport::FrameTransport;
