//! In-memory broker stand-ins shared by the session tests.
#![allow(dead_code)]

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use stompwire::{
    Command, ConnectOptions, Connection, ConnectionState, Frame, Heartbeat, SockJsCodec,
    StompCodec, StompItem,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(2);

/// Server end of a duplex pipe speaking the native wire format.
pub struct MockBroker {
    framed: Framed<DuplexStream, StompCodec>,
}

impl MockBroker {
    /// Returns the client's byte stream and the broker facing it.
    pub fn pair() -> (DuplexStream, MockBroker) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            client,
            MockBroker {
                framed: Framed::new(server, StompCodec::new()),
            },
        )
    }

    /// Next item from the client (heartbeats included); `None` on EOF.
    pub async fn recv_item(&mut self) -> Option<StompItem> {
        tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for client data")
            .map(|item| item.expect("client sent an undecodable frame"))
    }

    /// Next frame from the client, skipping heartbeats.
    pub async fn recv(&mut self) -> Frame {
        loop {
            match self.recv_item().await {
                Some(StompItem::Frame(frame)) => return frame,
                Some(StompItem::Heartbeat) => continue,
                None => panic!("client closed the stream while a frame was expected"),
            }
        }
    }

    /// Assert nothing but heartbeats arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        let deadline = tokio::time::Instant::now() + quiet;
        loop {
            match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Err(_) => return,
                Ok(Some(Ok(StompItem::Heartbeat))) => continue,
                Ok(other) => panic!("expected silence, got {:?}", other),
            }
        }
    }

    /// Read until the client closes its end.
    pub async fn expect_closed(&mut self) {
        loop {
            match self.recv_item().await {
                None => return,
                Some(_) => continue,
            }
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed
            .send(StompItem::Frame(frame))
            .await
            .expect("broker write failed");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.framed.get_mut();
        io.write_all(bytes).await.expect("broker write failed");
        io.flush().await.expect("broker flush failed");
    }

    /// Answer the CONNECT handshake and return the client's CONNECT frame.
    pub async fn accept(&mut self, version: Option<&str>, heart_beat: &str) -> Frame {
        let connect = self.recv().await;
        let mut connected = Frame::new(Command::Connected)
            .header("heart-beat", heart_beat)
            .header("session", "session-1")
            .header("server", "mock/1.0");
        if let Some(version) = version {
            connected = connected.header("version", version);
        }
        self.send(connected).await;
        connect
    }

    /// Deliver a MESSAGE for `subscription`.
    pub async fn message(&mut self, subscription: &str, message_id: &str, body: &str) {
        let frame = Frame::new(Command::Message)
            .header("destination", "/queue/test")
            .header("subscription", subscription)
            .header("message-id", message_id)
            .header("ack", format!("ack-{}", message_id))
            .set_body(body.as_bytes().to_vec());
        self.send(frame).await;
    }

    pub async fn receipt(&mut self, receipt_id: &str) {
        self.send(Frame::new(Command::Receipt).header("receipt-id", receipt_id))
            .await;
    }
}

/// Options with heartbeats disabled so sessions stay quiet.
pub fn quiet_options() -> ConnectOptions {
    ConnectOptions::default()
        .login("guest", "guest")
        .heartbeat(Heartbeat::disabled())
}

/// A session over a duplex pipe, already past CONNECTED.
pub async fn connected(version: &str) -> (Connection, MockBroker) {
    connected_with(version, quiet_options()).await
}

pub async fn connected_with(version: &str, options: ConnectOptions) -> (Connection, MockBroker) {
    let (io, mut broker) = MockBroker::pair();
    let client = tokio::spawn(Connection::connect_stream(io, options));
    broker.accept(Some(version), "0,0").await;
    let conn = client
        .await
        .expect("connect task panicked")
        .expect("connect failed");
    (conn, broker)
}

/// Wait until the connection publishes a terminal state.
pub async fn wait_terminal(conn: &Connection) -> ConnectionState {
    let mut rx: watch::Receiver<ConnectionState> = conn.watch_state();
    let state = tokio::time::timeout(WAIT, rx.wait_for(|s| s.is_terminal()))
        .await
        .expect("connection did not terminate in time")
        .expect("state channel closed");
    (*state).clone()
}

/// One end of an in-memory message channel (a WebSocket stand-in).
pub struct MessageChannel {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

pub fn channel_pair() -> (MessageChannel, MessageChannel) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MessageChannel {
            rx: a_rx,
            tx: Some(b_tx),
        },
        MessageChannel {
            rx: b_rx,
            tx: Some(a_tx),
        },
    )
}

impl MessageChannel {
    pub fn push(&self, message: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message.as_bytes().to_vec());
        }
    }

    pub async fn pop(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for channel message")
    }

    /// Next frame sent by the client, skipping heartbeats.
    pub async fn pop_frame(&mut self) -> Frame {
        let codec = SockJsCodec::new().strict(true);
        loop {
            let message = self.pop().await.expect("channel closed");
            if let Some(frame) = codec.decode_message(&message).expect("client sent bad JSON") {
                return frame;
            }
        }
    }
}

impl Stream for MessageChannel {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|m| m.map(Ok))
    }
}

impl Sink<Vec<u8>> for MessageChannel {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Vec<u8>) -> io::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(item)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx = None;
        Poll::Ready(Ok(()))
    }
}
