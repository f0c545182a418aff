use clap::{Parser, ValueEnum};

use super::logging::LogLevel;

/// Which transport the CLI dials.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// Native STOMP over TCP (uses --address)
    Tcp,
    /// SockJS-framed STOMP over a WebSocket (uses --url)
    Websocket,
}

#[derive(Parser)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client CLI")]
pub struct Cli {
    /// STOMP broker address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:61613")]
    pub address: String,

    /// WebSocket URL for the websocket transport (e.g. ws://host/stomp/websocket)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Transport to use
    #[arg(short, long, value_enum, default_value_t = TransportArg::Tcp)]
    pub transport: TransportArg,

    /// Login username
    #[arg(short, long, default_value = "guest")]
    pub login: String,

    /// Passcode
    #[arg(short, long, default_value = "guest")]
    pub passcode: String,

    /// Virtual host sent in the CONNECT frame
    #[arg(long)]
    pub host: Option<String>,

    /// Heartbeat settings (client-send,client-receive in ms)
    #[arg(long, default_value = "10000,10000")]
    pub heartbeat: String,

    /// Extra CONNECT header as name:value (can be specified multiple times)
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Log verbosity (written to stderr)
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,
}

/// Split `name:value` at the first colon.
pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected name:value, got '{}'", raw)),
    }
}
