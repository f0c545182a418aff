use futures::{FutureExt, SinkExt, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{StompCodec, StompItem};
use crate::error::{FrameError, ServerError};
use crate::frame::{Command, Frame};
use crate::options::{CodecKind, ConnectOptions, Heartbeat, Version};
use crate::sockjs::SockJsCodec;
use crate::subscription::{Subscription, SubscriptionOptions};
use crate::transaction::{FINISHED_TRANSACTION_LIMIT, Transaction, TransactionState, TransactionTable};
use crate::transport::{FrameTransport, channel_transport, stream_transport};

/// Internal subscription entry stored for each subscription id.
pub(crate) struct SubscriptionEntry {
    pub(crate) destination: String,
    pub(crate) sender: mpsc::UnboundedSender<Frame>,
}

/// subscription id -> delivery entry
pub(crate) type Subscriptions = HashMap<String, SubscriptionEntry>;

/// receipt-id -> waiter notified when the RECEIPT (or a fault) arrives
pub(crate) type PendingReceipts = HashMap<String, oneshot::Sender<Result<(), ConnError>>>;

/// Never held across an await, so `Receipt::drop` can take it synchronously.
type ReceiptMap = std::sync::Mutex<PendingReceipts>;

fn lock_receipts(pending: &ReceiptMap) -> MutexGuard<'_, PendingReceipts> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors returned by `Connection` operations.
#[derive(Error, Debug)]
pub enum ConnError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Codec-level error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// The CONNECT handshake failed without an ERROR frame
    #[error("connect failed: {0}")]
    Connect(String),
    /// The server answered CONNECT with an ERROR frame (bad credentials,
    /// unknown vhost, ...)
    #[error("server rejected connection: {0}")]
    ServerRejected(ServerError),
    /// The server sent an ERROR frame on an established connection
    #[error("{0}")]
    Server(ServerError),
    /// The transport failed after the connection was established
    #[error("transport failed: {0}")]
    Transport(String),
    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),
    /// Receipt timeout error
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),
    /// The connection is closed
    #[error("connection closed")]
    ConnectionClosed,
    /// Operation not allowed in the current state or mode
    #[error("usage error: {0}")]
    Usage(String),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Subscription acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Why a connection ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The server sent an ERROR frame.
    Server(ServerError),
    /// Read/write failure or a malformed inbound frame.
    Transport(String),
    /// Nothing arrived within the allowed window.
    HeartbeatTimeout(Duration),
}

impl Fault {
    pub(crate) fn to_error(&self) -> ConnError {
        match self {
            Fault::Server(e) => ConnError::Server(e.clone()),
            Fault::Transport(msg) => ConnError::Transport(msg.clone()),
            Fault::HeartbeatTimeout(window) => ConnError::Timeout(format!(
                "no data from server within {} ms",
                window.as_millis()
            )),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Server(e) => write!(f, "{}", e),
            Fault::Transport(msg) => write!(f, "transport failure: {}", msg),
            Fault::HeartbeatTimeout(window) => {
                write!(f, "heartbeat timeout after {} ms", window.as_millis())
            }
        }
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Failed(Fault),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed(_))
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: how often the client offers to send, in milliseconds.
/// - `client_in`: how often the client wants to hear from the server.
/// - `server_out`: server's advertised outgoing interval.
/// - `server_in`: server's advertised incoming interval.
///
/// Returns `(outgoing, incoming)`. A direction is enabled only when both
/// sides are non-zero for it; the interval is then the larger of the two.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let pick = |ours: u64, theirs: u64| {
        if ours == 0 || theirs == 0 {
            None
        } else {
            Some(Duration::from_millis(ours.max(theirs)))
        }
    };
    (pick(client_out, server_in), pick(client_in, server_out))
}

/// Pick the session version from the server's `version` header.
///
/// A missing header means 1.0. The result must be one of `offered`.
pub fn negotiate_version(offered: &[Version], server: Option<&str>) -> Result<Version, ConnError> {
    let version = match server {
        None => Version::V1_0,
        Some(raw) => Version::parse(raw)
            .ok_or_else(|| ConnError::Connect(format!("server chose unknown version '{}'", raw)))?,
    };
    if offered.contains(&version) {
        Ok(version)
    } else {
        Err(ConnError::Connect(format!(
            "server chose version {} which was not offered",
            version
        )))
    }
}

/// Per-connection id counters and lookup tables shared between handles and
/// the dispatch task.
struct Shared {
    subscriptions: Mutex<Subscriptions>,
    pending_receipts: Arc<ReceiptMap>,
    transactions: Mutex<TransactionTable>,
    sub_id_counter: AtomicU64,
    receipt_counter: AtomicU64,
    tx_counter: AtomicU64,
}

/// A pending RECEIPT for a frame sent with `send_frame_with_receipt`.
///
/// Dropping it (or a `wait` future that is cancelled) removes the waiter, so
/// a RECEIPT that arrives afterwards is ignored.
pub struct Receipt {
    id: String,
    rx: oneshot::Receiver<Result<(), ConnError>>,
    pending: Arc<ReceiptMap>,
}

impl Receipt {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the RECEIPT.
    ///
    /// On timeout the waiter is removed so a late RECEIPT is ignored, and
    /// `ConnError::ReceiptTimeout` is returned. A connection fault or close
    /// while waiting is returned as the corresponding error.
    pub async fn wait(mut self, timeout: Duration) -> Result<(), ConnError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnError::ConnectionClosed),
            Err(_) => Err(ConnError::ReceiptTimeout(self.id.clone())),
        }
    }
}

impl Drop for Receipt {
    fn drop(&mut self) {
        self.rx.close();
        let mut pending = lock_receipts(&self.pending);
        // a reused receipt id belongs to a newer, still open waiter
        if pending.get(&self.id).is_some_and(|tx| tx.is_closed()) {
            pending.remove(&self.id);
        }
    }
}

/// Handle to one STOMP session.
///
/// A background task owns the transport: it writes everything queued by the
/// handles (one writer, so frames never interleave), routes inbound MESSAGE
/// and RECEIPT frames, sends heartbeats and watches for server silence. The
/// handle is cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct Connection {
    outbound_tx: mpsc::Sender<StompItem>,
    shutdown_tx: broadcast::Sender<()>,
    state: Arc<watch::Sender<ConnectionState>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    shared: Arc<Shared>,
    version: Version,
    heartbeat: (Option<Duration>, Option<Duration>),
    session: Option<String>,
    server: Option<String>,
    disconnect_timeout: Duration,
}

impl Connection {
    /// Heartbeat value that disables heartbeats in both directions.
    pub const NO_HEARTBEAT: &'static str = "0,0";

    /// Default heartbeat proposal (10 s each way).
    pub const DEFAULT_HEARTBEAT: &'static str = "10000,10000";

    /// Connect over TCP to `addr` with login credentials and a `heart-beat`
    /// header value such as `"10000,10000"`.
    pub async fn connect(
        addr: &str,
        login: &str,
        passcode: &str,
        client_hb: &str,
    ) -> Result<Self, ConnError> {
        let options = ConnectOptions::default()
            .login(login, passcode)
            .heartbeat(Heartbeat::parse(client_hb));
        Self::connect_with_options(addr, options).await
    }

    /// Connect over TCP to `addr` with full control over the handshake.
    pub async fn connect_with_options(addr: &str, options: ConnectOptions) -> Result<Self, ConnError> {
        let stream = TcpStream::connect(addr).await?;
        Self::connect_stream(stream, options).await
    }

    /// Connect to `target` using the transport selected by `options.codec`.
    ///
    /// `CodecKind::Stream` treats `target` as a `host:port` TCP address,
    /// `CodecKind::Channel` as a WebSocket URL. The latter requires the
    /// `websocket` feature.
    pub async fn open(target: &str, options: ConnectOptions) -> Result<Self, ConnError> {
        match options.codec {
            CodecKind::Stream => Self::connect_with_options(target, options).await,
            #[cfg(feature = "websocket")]
            CodecKind::Channel => {
                let channel = crate::transport::WebSocketChannel::connect(target, &options.headers).await?;
                Self::connect_channel(channel, options).await
            }
            #[cfg(not(feature = "websocket"))]
            CodecKind::Channel => Err(ConnError::Usage(format!(
                "cannot open '{}': built without the `websocket` feature",
                target
            ))),
        }
    }

    /// Run the session over an already established byte stream.
    pub async fn connect_stream<T>(io: T, options: ConnectOptions) -> Result<Self, ConnError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = StompCodec::with_max_header_len(options.max_header_len);
        Self::connect_transport(stream_transport(io, codec), options).await
    }

    /// Run the session over a message channel carrying SockJS envelopes.
    pub async fn connect_channel<C>(channel: C, options: ConnectOptions) -> Result<Self, ConnError>
    where
        C: futures::Stream<Item = io::Result<Vec<u8>>>
            + futures::Sink<Vec<u8>, Error = io::Error>
            + Send
            + Unpin
            + 'static,
    {
        let codec = SockJsCodec::new().strict(options.strict_channel);
        Self::connect_transport(channel_transport(channel, codec), options).await
    }

    /// Perform the handshake on `transport` and start the session task.
    pub async fn connect_transport<T: FrameTransport>(
        mut transport: T,
        options: ConnectOptions,
    ) -> Result<Self, ConnError> {
        let offered = options.offered_versions();
        transport
            .send(StompItem::Frame(build_connect_frame(&options)))
            .await
            .map_err(|e| ConnError::Connect(format!("failed to send CONNECT: {}", e)))?;

        let connected = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, await_connected(&mut transport))
                .await
                .map_err(|_| {
                    ConnError::Timeout(format!(
                        "no CONNECTED frame within {} ms",
                        limit.as_millis()
                    ))
                })??,
            None => await_connected(&mut transport).await?,
        };

        let version = negotiate_version(&offered, connected.get_header("version"))?;
        let (sx, sy) = parse_heartbeat_header(connected.get_header("heart-beat").unwrap_or("0,0"));
        let heartbeat = negotiate_heartbeats(
            options.heartbeat.send_ms,
            options.heartbeat.receive_ms,
            sx,
            sy,
        );
        info!(
            %version,
            session = connected.get_header("session").unwrap_or(""),
            server = connected.get_header("server").unwrap_or(""),
            "STOMP session established"
        );
        debug!(send = ?heartbeat.0, receive = ?heartbeat.1, "negotiated heartbeats");

        let (outbound_tx, outbound_rx) = mpsc::channel::<StompItem>(32);
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        let state = Arc::new(state_tx);
        let shared = Arc::new(Shared {
            subscriptions: Mutex::new(HashMap::new()),
            pending_receipts: Arc::new(std::sync::Mutex::new(HashMap::new())),
            transactions: Mutex::new(TransactionTable::new(FINISHED_TRANSACTION_LIMIT)),
            sub_id_counter: AtomicU64::new(1),
            receipt_counter: AtomicU64::new(1),
            tx_counter: AtomicU64::new(1),
        });

        let dispatcher = Dispatcher {
            transport,
            outbound_rx,
            shutdown_rx,
            shared: Arc::clone(&shared),
            state: Arc::clone(&state),
            send_interval: heartbeat.0,
            recv_interval: heartbeat.1,
        };
        let task_shared = Arc::clone(&shared);
        let task_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(dispatcher.run()).catch_unwind().await;
            if let Err(panic) = outcome {
                let fault = Fault::Transport(format!("session task panicked: {}", panic_reason(&*panic)));
                finish_session(&task_shared, &task_state, Some(fault)).await;
            }
        });

        Ok(Connection {
            outbound_tx,
            shutdown_tx,
            state,
            task: Arc::new(Mutex::new(Some(handle))),
            shared,
            version,
            heartbeat,
            session: connected.get_header("session").map(str::to_string),
            server: connected.get_header("server").map(str::to_string),
            disconnect_timeout: options.disconnect_timeout,
        })
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Negotiated `(outgoing, incoming)` heartbeat intervals.
    pub fn heartbeat(&self) -> (Option<Duration>, Option<Duration>) {
        self.heartbeat
    }

    /// `session` header of the CONNECTED frame.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// `server` header of the CONNECTED frame.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Number of RECEIPTs still awaited by live `Receipt` handles.
    pub fn pending_receipts(&self) -> usize {
        lock_receipts(&self.shared.pending_receipts).len()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Error describing why the session can no longer be used.
    pub(crate) fn closed_error(&self) -> ConnError {
        match &*self.state.borrow() {
            ConnectionState::Failed(fault) => fault.to_error(),
            _ => ConnError::ConnectionClosed,
        }
    }

    async fn enqueue(&self, item: StompItem) -> Result<(), ConnError> {
        self.outbound_tx
            .send(item)
            .await
            .map_err(|_| self.closed_error())
    }

    /// Queue a frame for writing.
    ///
    /// Only client commands are accepted. A frame tagged with the id of a
    /// committed or aborted transaction is rejected without being written.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        if !frame.command.is_client_command() {
            return Err(ConnError::Usage(format!(
                "{} is a server frame and cannot be sent",
                frame.command
            )));
        }
        if let Some(tx_id) = frame.get_header("transaction") {
            let txs = self.shared.transactions.lock().await;
            if let Some(state) = txs.state(tx_id).filter(|s| s.is_terminal()) {
                return Err(ConnError::Usage(format!(
                    "transaction '{}' is already {}",
                    tx_id, state
                )));
            }
        }
        self.enqueue(StompItem::Frame(frame)).await
    }

    /// Send a message to `destination`.
    pub async fn send(
        &self,
        destination: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), ConnError> {
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", content_type)
            .set_body(body);
        self.send_frame(frame).await
    }

    fn next_receipt_id(&self) -> String {
        format!(
            "rcpt-{}",
            self.shared.receipt_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Send a frame with a `receipt` header and return a handle for the
    /// server's confirmation.
    ///
    /// An existing `receipt` header is kept and its value used as the id;
    /// otherwise a fresh id is generated.
    pub async fn send_frame_with_receipt(&self, frame: Frame) -> Result<Receipt, ConnError> {
        let (id, frame) = match frame.get_header("receipt") {
            Some(existing) => (existing.to_string(), frame),
            None => {
                let id = self.next_receipt_id();
                let frame = frame.receipt(id.clone());
                (id, frame)
            }
        };

        let (tx, rx) = oneshot::channel();
        lock_receipts(&self.shared.pending_receipts).insert(id.clone(), tx);
        let receipt = Receipt {
            id,
            rx,
            pending: Arc::clone(&self.shared.pending_receipts),
        };

        // on failure the dropped receipt removes its own record
        self.send_frame(frame).await?;
        Ok(receipt)
    }

    /// Send a frame and wait up to `timeout` for its RECEIPT.
    pub async fn send_frame_confirmed(&self, frame: Frame, timeout: Duration) -> Result<(), ConnError> {
        self.send_frame_with_receipt(frame).await?.wait(timeout).await
    }

    /// Subscribe to `destination`.
    pub async fn subscribe(&self, destination: &str, ack: AckMode) -> Result<Subscription, ConnError> {
        self.subscribe_with_options(destination, ack, SubscriptionOptions::default())
            .await
    }

    /// Subscribe with extra SUBSCRIBE headers.
    pub async fn subscribe_with_headers(
        &self,
        destination: &str,
        ack: AckMode,
        extra_headers: Vec<(String, String)>,
    ) -> Result<Subscription, ConnError> {
        let options = SubscriptionOptions {
            headers: extra_headers,
            ..SubscriptionOptions::default()
        };
        self.subscribe_with_options(destination, ack, options).await
    }

    /// Subscribe with full options.
    ///
    /// The delivery queue is registered before SUBSCRIBE is written, so no
    /// MESSAGE can arrive for an unknown id. With `options.receipt` set the
    /// call also waits for the server's RECEIPT.
    pub async fn subscribe_with_options(
        &self,
        destination: &str,
        ack: AckMode,
        options: SubscriptionOptions,
    ) -> Result<Subscription, ConnError> {
        let id = self
            .shared
            .sub_id_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.subscriptions.lock().await.insert(
            id.clone(),
            SubscriptionEntry {
                destination: destination.to_string(),
                sender,
            },
        );

        let mut frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", ack.as_str());
        for (k, v) in &options.headers {
            frame = frame.header(k.as_str(), v.as_str());
        }

        let result = match options.receipt {
            Some(timeout) => self.send_frame_confirmed(frame, timeout).await,
            None => self.enqueue(StompItem::Frame(frame)).await,
        };
        if let Err(e) = result {
            self.shared.subscriptions.lock().await.remove(&id);
            return Err(e);
        }

        debug!(subscription = %id, destination, ack = ack.as_str(), "subscribed");
        Ok(Subscription::new(
            id,
            destination.to_string(),
            ack,
            receiver,
            self.clone(),
        ))
    }

    /// Stop delivery for `subscription_id` and send UNSUBSCRIBE.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<(), ConnError> {
        if self
            .shared
            .subscriptions
            .lock()
            .await
            .remove(subscription_id)
            .is_none()
        {
            return Err(ConnError::Usage(format!(
                "subscription id '{}' not found",
                subscription_id
            )));
        }
        let frame = Frame::new(Command::Unsubscribe).header("id", subscription_id);
        self.enqueue(StompItem::Frame(frame)).await
    }

    /// Build and send ACK or NACK for `message` with the headers the
    /// negotiated version expects.
    pub(crate) async fn acknowledge(
        &self,
        command: Command,
        ack: AckMode,
        subscription_id: &str,
        message: &Frame,
        transaction: Option<&str>,
    ) -> Result<(), ConnError> {
        if ack == AckMode::Auto {
            return Err(ConnError::Usage(format!(
                "subscription '{}' uses auto acknowledgement",
                subscription_id
            )));
        }
        let frame = ack_frame(command, self.version, subscription_id, message)?;
        let frame = match transaction {
            Some(tx_id) => frame.header("transaction", tx_id),
            None => frame,
        };
        self.send_frame(frame).await
    }

    /// Start a transaction with a generated id.
    pub async fn begin(&self) -> Result<Transaction, ConnError> {
        let id = format!("tx-{}", self.shared.tx_counter.fetch_add(1, Ordering::SeqCst));
        self.begin_with_id(&id).await
    }

    /// Start a transaction with a caller-chosen id.
    ///
    /// An id that is open, or among the most recently finished ones, is
    /// rejected with `ConnError::Usage`.
    pub async fn begin_with_id(&self, transaction_id: &str) -> Result<Transaction, ConnError> {
        let cell = self.shared.transactions.lock().await.open(transaction_id)?;
        let frame = Frame::new(Command::Begin).header("transaction", transaction_id);
        if let Err(e) = self.enqueue(StompItem::Frame(frame)).await {
            self.shared.transactions.lock().await.forget(transaction_id);
            return Err(e);
        }
        Ok(Transaction::new(transaction_id.to_string(), cell, self.clone()))
    }

    /// Commit the open transaction `transaction_id`.
    pub async fn commit(&self, transaction_id: &str) -> Result<(), ConnError> {
        self.finish_transaction(transaction_id, TransactionState::Committed)
            .await
    }

    /// Abort the open transaction `transaction_id`.
    pub async fn abort(&self, transaction_id: &str) -> Result<(), ConnError> {
        self.finish_transaction(transaction_id, TransactionState::Aborted)
            .await
    }

    async fn finish_transaction(
        &self,
        transaction_id: &str,
        outcome: TransactionState,
    ) -> Result<(), ConnError> {
        self.shared
            .transactions
            .lock()
            .await
            .finish(transaction_id, outcome)?;
        let command = match outcome {
            TransactionState::Aborted => Command::Abort,
            _ => Command::Commit,
        };
        let frame = Frame::new(command).header("transaction", transaction_id);
        self.enqueue(StompItem::Frame(frame)).await
    }

    /// Current state of `transaction_id`, if it was begun here and has not
    /// yet been evicted from the finished-id history.
    pub async fn transaction_state(&self, transaction_id: &str) -> Option<TransactionState> {
        self.shared.transactions.lock().await.state(transaction_id)
    }

    /// Graceful shutdown: DISCONNECT with a receipt, bounded by the
    /// configured disconnect timeout, then stop the session task.
    ///
    /// The task is stopped even when the receipt wait fails; that failure is
    /// still returned.
    pub async fn disconnect(self) -> Result<(), ConnError> {
        if self.state().is_terminal() {
            return Err(self.closed_error());
        }
        self.state.send_replace(ConnectionState::Disconnecting);
        let result = match self
            .send_frame_with_receipt(Frame::new(Command::Disconnect))
            .await
        {
            Ok(receipt) => receipt.wait(self.disconnect_timeout).await,
            Err(e) => Err(e),
        };
        self.shutdown().await;
        result
    }

    /// Stop the session task without the DISCONNECT exchange.
    pub async fn close(self) {
        self.shutdown().await;
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn build_connect_frame(options: &ConnectOptions) -> Frame {
    let command = if options.use_stomp_command {
        Command::Stomp
    } else {
        Command::Connect
    };
    let mut frame = Frame::new(command)
        .header("accept-version", options.accept_version_header())
        .header("host", options.host.as_deref().unwrap_or("/"));
    if let Some(login) = &options.login {
        frame = frame.header("login", login.as_str());
    }
    if let Some(passcode) = &options.passcode {
        frame = frame.header("passcode", passcode.as_str());
    }
    frame = frame.header("heart-beat", options.heartbeat.to_string());
    if let Some(client_id) = &options.client_id {
        frame = frame.header("client-id", client_id.as_str());
    }
    for (k, v) in &options.headers {
        frame = frame.header(k.as_str(), v.as_str());
    }
    frame
}

async fn await_connected<T: FrameTransport>(transport: &mut T) -> Result<Frame, ConnError> {
    loop {
        match transport.next().await {
            Some(Ok(StompItem::Heartbeat)) => continue,
            Some(Ok(StompItem::Frame(frame))) => {
                return match frame.command {
                    Command::Connected => Ok(frame),
                    Command::Error => {
                        let err = ServerError::from_frame(frame);
                        warn!(message = %err.message, "server rejected CONNECT");
                        Err(ConnError::ServerRejected(err))
                    }
                    other => Err(ConnError::Connect(format!(
                        "expected CONNECTED, got {}",
                        other
                    ))),
                };
            }
            Some(Err(e)) => {
                return Err(ConnError::Connect(format!(
                    "failed reading CONNECTED: {}",
                    e
                )));
            }
            None => {
                return Err(ConnError::Connect(
                    "connection closed before CONNECTED".to_string(),
                ));
            }
        }
    }
}

/// ACK/NACK frame for `message`, shaped for `version`.
pub(crate) fn ack_frame(
    command: Command,
    version: Version,
    subscription_id: &str,
    message: &Frame,
) -> Result<Frame, ConnError> {
    let required = |name: &str| {
        message.get_header(name).ok_or_else(|| {
            ConnError::Protocol(format!("MESSAGE has no '{}' header to acknowledge", name))
        })
    };
    let frame = Frame::new(command);
    match version {
        Version::V1_2 => Ok(frame.header("id", required("ack")?)),
        Version::V1_1 => Ok(frame
            .header("message-id", required("message-id")?)
            .header("subscription", subscription_id)),
        Version::V1_0 if command == Command::Nack => Err(ConnError::Usage(
            "NACK is not available on STOMP 1.0".to_string(),
        )),
        Version::V1_0 => Ok(frame.header("message-id", required("message-id")?)),
    }
}

/// Owner of the transport for one session.
struct Dispatcher<T> {
    transport: T,
    outbound_rx: mpsc::Receiver<StompItem>,
    shutdown_rx: broadcast::Receiver<()>,
    shared: Arc<Shared>,
    state: Arc<watch::Sender<ConnectionState>>,
    send_interval: Option<Duration>,
    recv_interval: Option<Duration>,
}

impl<T: FrameTransport> Dispatcher<T> {
    async fn run(mut self) {
        let send_interval = self.send_interval;
        let recv_interval = self.recv_interval;

        // ticking at half the interval keeps the gap between writes under it
        let mut hb_tick = tokio::time::interval(
            send_interval
                .map(|d| (d / 2).max(Duration::from_millis(1)))
                .unwrap_or(Duration::from_secs(86400)),
        );
        hb_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog_tick = tokio::time::interval(
            recv_interval
                .map(|d| (d / 2).max(Duration::from_millis(1)))
                .unwrap_or(Duration::from_secs(86400)),
        );
        watchdog_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_sent = Instant::now();
        let mut last_received = Instant::now();

        let fault = loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    let _ = self.transport.close().await;
                    break None;
                }
                maybe = self.outbound_rx.recv() => match maybe {
                    Some(item) => {
                        if let Err(e) = self.transport.send(item).await {
                            break Some(Fault::Transport(format!("write failed: {}", e)));
                        }
                        last_sent = Instant::now();
                    }
                    // every handle dropped
                    None => {
                        let _ = self.transport.close().await;
                        break None;
                    }
                },
                item = self.transport.next() => match item {
                    Some(Ok(StompItem::Heartbeat)) => {
                        last_received = Instant::now();
                        trace!("heartbeat received");
                    }
                    Some(Ok(StompItem::Frame(frame))) => {
                        last_received = Instant::now();
                        if let Some(fault) = self.dispatch(frame).await {
                            break Some(fault);
                        }
                    }
                    Some(Err(e)) => break Some(Fault::Transport(e.to_string())),
                    None => break None,
                },
                _ = hb_tick.tick(), if send_interval.is_some() => {
                    if let Some(interval) = send_interval {
                        if last_sent.elapsed() >= interval {
                            if let Err(e) = self.transport.send(StompItem::Heartbeat).await {
                                break Some(Fault::Transport(format!("heartbeat write failed: {}", e)));
                            }
                            trace!("heartbeat sent");
                            last_sent = Instant::now();
                        }
                    }
                }
                _ = watchdog_tick.tick(), if recv_interval.is_some() => {
                    if let Some(interval) = recv_interval {
                        let window = interval * 2;
                        if last_received.elapsed() > window {
                            let _ = self.transport.close().await;
                            break Some(Fault::HeartbeatTimeout(window));
                        }
                    }
                }
            }
        };

        self.teardown(fault).await;
    }

    /// Route one inbound frame. Returns a fault when the session must end.
    async fn dispatch(&mut self, frame: Frame) -> Option<Fault> {
        match frame.command {
            Command::Message => {
                self.deliver(frame).await;
                None
            }
            Command::Receipt => {
                match frame.get_header("receipt-id") {
                    Some(receipt_id) => {
                        let waiter = lock_receipts(&self.shared.pending_receipts).remove(receipt_id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(Ok(()));
                            }
                            None => debug!(receipt_id, "RECEIPT for unknown or abandoned receipt id"),
                        }
                    }
                    None => warn!("RECEIPT frame without receipt-id ignored"),
                }
                None
            }
            Command::Error => Some(Fault::Server(ServerError::from_frame(frame))),
            other => {
                warn!(command = %other, "unexpected frame from server ignored");
                None
            }
        }
    }

    /// Deliver a MESSAGE to its subscription queue.
    ///
    /// Frames without a `subscription` header (STOMP 1.0 servers) go to every
    /// subscription on the frame's destination.
    async fn deliver(&mut self, frame: Frame) {
        let mut subs = self.shared.subscriptions.lock().await;

        if let Some(sub_id) = frame.get_header("subscription").map(str::to_string) {
            let delivered = subs.get(&sub_id).map(|entry| entry.sender.send(frame).is_ok());
            match delivered {
                Some(true) => {}
                Some(false) => {
                    debug!(subscription = %sub_id, "subscriber gone; dropping subscription");
                    subs.remove(&sub_id);
                }
                None => warn!(subscription = %sub_id, "MESSAGE for unknown subscription dropped"),
            }
            return;
        }

        let Some(destination) = frame.get_header("destination").map(str::to_string) else {
            warn!("MESSAGE without subscription or destination dropped");
            return;
        };
        let mut matched = false;
        subs.retain(|_, entry| {
            if entry.destination != destination {
                return true;
            }
            matched = true;
            entry.sender.send(frame.clone()).is_ok()
        });
        if !matched {
            warn!(%destination, "MESSAGE for destination without subscribers dropped");
        }
    }

    /// Normal exit path: stop accepting outbound frames, then fail every
    /// waiter and close every subscription queue.
    async fn teardown(mut self, fault: Option<Fault>) {
        // A transport error while disconnecting is the server hanging up.
        let fault = match fault {
            Some(Fault::Transport(_))
                if *self.state.borrow() == ConnectionState::Disconnecting =>
            {
                None
            }
            other => other,
        };
        self.outbound_rx.close();
        finish_session(&self.shared, &self.state, fault).await;
    }
}

/// Publish the final state and release everything waiting on the session.
///
/// Also runs when the dispatch task panicked, so no waiter is left behind.
async fn finish_session(
    shared: &Shared,
    state: &watch::Sender<ConnectionState>,
    fault: Option<Fault>,
) {
    match &fault {
        Some(f) => {
            error!(fault = %f, "STOMP connection failed");
            state.send_replace(ConnectionState::Failed(f.clone()));
        }
        None => {
            info!("STOMP connection closed");
            state.send_replace(ConnectionState::Disconnected);
        }
    }

    let waiters: Vec<_> = lock_receipts(&shared.pending_receipts)
        .drain()
        .map(|(_, tx)| tx)
        .collect();
    for tx in waiters {
        let err = match &fault {
            Some(f) => f.to_error(),
            None => ConnError::ConnectionClosed,
        };
        let _ = tx.send(Err(err));
    }

    shared.subscriptions.lock().await.clear();
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
