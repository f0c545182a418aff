use std::fmt;
use std::time::Duration;

use crate::codec::DEFAULT_MAX_HEADER_LEN;
use crate::connection::parse_heartbeat_header;

/// STOMP protocol versions this client can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parse a `version` header value such as `"1.2"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0" => Some(Version::V1_0),
            "1.1" => Some(Version::V1_1),
            "1.2" => Some(Version::V1_2),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heartbeat configuration for a STOMP connection.
///
/// STOMP heartbeats allow both client and server to detect connection
/// failures. `send_ms` is how often the client promises to send something,
/// `receive_ms` how often it wants to hear from the server. Zero disables a
/// direction.
///
/// # Example
///
/// ```
/// use stompwire::Heartbeat;
/// use std::time::Duration;
///
/// let hb = Heartbeat::new(5000, 10000);
/// assert_eq!(hb.to_string(), "5000,10000");
///
/// let hb = Heartbeat::from_duration(Duration::from_secs(15));
/// assert_eq!(hb.to_string(), "15000,15000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Client send interval in milliseconds (0 = don't send).
    pub send_ms: u64,
    /// Desired server send interval in milliseconds (0 = don't expect).
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same interval in both directions.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self::new(ms, ms)
    }

    /// Parse a `heart-beat` header value (`"cx,cy"`); invalid fields become 0.
    pub fn parse(header: &str) -> Self {
        let (send_ms, receive_ms) = parse_heartbeat_header(header);
        Self::new(send_ms, receive_ms)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(10000, 10000)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

/// Which frame codec `Connection::open` puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    /// Native STOMP over a TCP byte stream.
    #[default]
    Stream,
    /// SockJS-style JSON array envelopes over a WebSocket.
    Channel,
}

/// Options for the CONNECT handshake and the resulting session.
///
/// Built with chained setters starting from `ConnectOptions::default()`.
///
/// # Example
///
/// ```
/// use stompwire::{ConnectOptions, Version};
/// use std::time::Duration;
///
/// let opts = ConnectOptions::default()
///     .login("guest", "guest")
///     .host("/")
///     .accept_version([Version::V1_1, Version::V1_2])
///     .header("Authorization", "Bearer token")
///     .connect_timeout(Duration::from_secs(10));
/// assert_eq!(opts.accept_version_header(), "1.1,1.2");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Virtual host; `"/"` is sent when unset.
    pub host: Option<String>,
    /// Versions offered in `accept-version`.
    pub accept_version: Vec<Version>,
    pub heartbeat: Heartbeat,
    /// `client-id` header, used by some brokers for durable subscriptions.
    pub client_id: Option<String>,
    /// Extra CONNECT headers, appended after the standard ones.
    pub headers: Vec<(String, String)>,
    /// Send STOMP instead of CONNECT as the opening command.
    pub use_stomp_command: bool,
    pub codec: CodecKind,
    /// Bound on the wait for CONNECTED; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Bound on the wait for the DISCONNECT receipt.
    pub disconnect_timeout: Duration,
    /// Header section limit for the stream codec.
    pub max_header_len: usize,
    /// Fail on malformed channel messages instead of skipping them.
    pub strict_channel: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            login: None,
            passcode: None,
            host: None,
            accept_version: Version::ALL.to_vec(),
            heartbeat: Heartbeat::default(),
            client_id: None,
            headers: Vec::new(),
            use_stomp_command: false,
            codec: CodecKind::default(),
            connect_timeout: None,
            disconnect_timeout: Duration::from_secs(5),
            max_header_len: DEFAULT_MAX_HEADER_LEN,
            strict_channel: false,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn accept_version(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.accept_version = versions.into_iter().collect();
        self
    }

    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Add a custom CONNECT header. May be called repeatedly.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn use_stomp_command(mut self) -> Self {
        self.use_stomp_command = true;
        self
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn max_header_len(mut self, len: usize) -> Self {
        self.max_header_len = len;
        self
    }

    pub fn strict_channel(mut self, strict: bool) -> Self {
        self.strict_channel = strict;
        self
    }

    /// Versions actually offered; an empty list falls back to all of them.
    pub fn offered_versions(&self) -> Vec<Version> {
        if self.accept_version.is_empty() {
            Version::ALL.to_vec()
        } else {
            self.accept_version.clone()
        }
    }

    /// Comma separated `accept-version` header value.
    pub fn accept_version_header(&self) -> String {
        self.offered_versions()
            .iter()
            .map(Version::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
