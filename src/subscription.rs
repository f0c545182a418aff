use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::connection::{AckMode, ConnError, Connection, ConnectionState};
use crate::frame::{Command, Frame};

/// Extra settings for `Connection::subscribe_with_options`.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Additional SUBSCRIBE headers (selectors, durable names, ...).
    pub headers: Vec<(String, String)>,
    /// When set, request a RECEIPT for the SUBSCRIBE and wait this long for it.
    pub receipt: Option<Duration>,
}

impl SubscriptionOptions {
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn receipt(mut self, timeout: Duration) -> Self {
        self.receipt = Some(timeout);
        self
    }
}

/// A subscription returned by `Connection::subscribe`.
///
/// MESSAGE frames for this subscription are queued in arrival order. Read
/// them with [`Subscription::next_message`] or use the `Stream` impl. The
/// queue closes when the connection ends; `next_message` then reports why,
/// and the stream yields the fault once (if there was one) before ending.
pub struct Subscription {
    id: String,
    destination: String,
    ack: AckMode,
    receiver: mpsc::UnboundedReceiver<Frame>,
    conn: Connection,
    ended: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        destination: String,
        ack: AckMode,
        receiver: mpsc::UnboundedReceiver<Frame>,
        conn: Connection,
    ) -> Self {
        Self {
            id,
            destination,
            ack,
            receiver,
            conn,
            ended: false,
        }
    }

    /// Subscription id assigned by the connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack
    }

    /// Next MESSAGE, waiting as long as needed.
    ///
    /// Once the connection has ended this returns the fault that ended it
    /// (for example `ConnError::Server` after an ERROR frame) or
    /// `ConnError::ConnectionClosed`.
    pub async fn next_message(&mut self) -> Result<Frame, ConnError> {
        match self.receiver.recv().await {
            Some(frame) => Ok(frame),
            None => Err(self.conn.closed_error()),
        }
    }

    /// Acknowledge `message`.
    ///
    /// In `Client` mode the server treats this as cumulative; in
    /// `ClientIndividual` mode it covers only `message`. Fails with
    /// `ConnError::Usage` on an `Auto` subscription.
    pub async fn ack(&self, message: &Frame) -> Result<(), ConnError> {
        self.acknowledge(Command::Ack, message, None).await
    }

    /// Negatively acknowledge `message`. Not available on STOMP 1.0.
    pub async fn nack(&self, message: &Frame) -> Result<(), ConnError> {
        self.acknowledge(Command::Nack, message, None).await
    }

    pub(crate) async fn acknowledge(
        &self,
        command: Command,
        message: &Frame,
        transaction: Option<&str>,
    ) -> Result<(), ConnError> {
        self.conn
            .acknowledge(command, self.ack, &self.id, message, transaction)
            .await
    }

    /// Send UNSUBSCRIBE and stop delivery. Queued messages are discarded.
    pub async fn unsubscribe(self) -> Result<(), ConnError> {
        self.conn.unsubscribe(&self.id).await
    }

    /// Take the raw delivery queue.
    ///
    /// The subscription stays registered with the server; use
    /// `Connection::unsubscribe` with the id to end it.
    pub fn into_receiver(self) -> mpsc::UnboundedReceiver<Frame> {
        self.receiver
    }
}

impl Stream for Subscription {
    type Item = Result<Frame, ConnError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match ready!(self.receiver.poll_recv(cx)) {
            Some(frame) => Poll::Ready(Some(Ok(frame))),
            None => {
                self.ended = true;
                match self.conn.state() {
                    ConnectionState::Failed(fault) => Poll::Ready(Some(Err(fault.to_error()))),
                    _ => Poll::Ready(None),
                }
            }
        }
    }
}
