use std::io::{self, BufRead, Write};
use std::time::Duration;
use stompwire::{AckMode, CodecKind, ConnError, ConnectOptions, Connection, Frame, Heartbeat};
use tokio::sync::mpsc;

use super::args::{Cli, TransportArg};
use super::commands::{CommandResult, execute_command, print_help};
use super::exit_codes;

/// Run the interactive line-oriented client
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let (target, options) = connect_target(cli)?;
    println!("Connecting to {}...", target);

    let conn = Connection::open(&target, options)
        .await
        .map_err(|e| format_connection_error(&e, &target))?;

    println!("Connected (STOMP {}).", conn.version());

    // Channel for new subscription requests
    let (sub_tx, mut sub_rx) = mpsc::channel::<String>(16);

    // Subscribe to requested destinations
    for dest in &cli.subscribe {
        subscribe_destination(&conn, dest).await?;
    }

    // Spawn task to handle new subscription requests
    let conn_sub = conn.clone();
    tokio::spawn(async move {
        while let Some(dest) = sub_rx.recv().await {
            if let Err((msg, _)) = subscribe_destination(&conn_sub, &dest).await {
                eprintln!("{}", msg);
            }
        }
    });

    // Report a broker ERROR or lost connection as soon as it happens
    let mut state_rx = conn.watch_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            if let stompwire::ConnectionState::Failed(fault) = &*state_rx.borrow() {
                eprintln!("\n[CONNECTION FAILED] {}", fault);
                break;
            }
        }
    });

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let Some(line) = cmd_rx.recv().await else {
            break;
        };

        match execute_command(&line, &conn, &sub_tx).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    if let Err(e) = conn.disconnect().await {
        tracing::warn!(error = %e, "disconnect did not complete cleanly");
    }
    Ok(())
}

/// Resolve the dial target and CONNECT options from the command line.
fn connect_target(cli: &Cli) -> Result<(String, ConnectOptions), (String, u8)> {
    let mut options = ConnectOptions::default()
        .login(cli.login.as_str(), cli.passcode.as_str())
        .heartbeat(Heartbeat::parse(&cli.heartbeat))
        .connect_timeout(Duration::from_secs(10));
    if let Some(host) = &cli.host {
        options = options.host(host.as_str());
    }
    for (name, value) in &cli.headers {
        options = options.header(name.as_str(), value.as_str());
    }

    match cli.transport {
        TransportArg::Tcp => Ok((cli.address.clone(), options)),
        TransportArg::Websocket => {
            let url = cli.url.clone().ok_or_else(|| {
                (
                    "--url is required with --transport websocket".to_string(),
                    exit_codes::NETWORK_ERROR,
                )
            })?;
            Ok((url, options.codec(CodecKind::Channel)))
        }
    }
}

/// Subscribe to a destination and spawn a message printer task
async fn subscribe_destination(conn: &Connection, dest: &str) -> Result<(), (String, u8)> {
    let sub = conn.subscribe(dest, AckMode::Auto).await.map_err(|e| {
        (
            format!("Failed to subscribe to '{}': {}", dest, e),
            exit_codes::PROTOCOL_ERROR,
        )
    })?;

    println!("Subscribed to: {}", dest);

    let dest = dest.to_string();
    let mut rx = sub.into_receiver();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            print_message(&dest, &frame);
        }
    });

    Ok(())
}

fn print_message(dest: &str, frame: &Frame) {
    println!("\n[{}] MESSAGE received:", dest);
    for (k, v) in frame.headers.iter() {
        println!("  {}: {}", k, v);
    }
    if !frame.body.is_empty() {
        match std::str::from_utf8(&frame.body) {
            Ok(s) => println!("  Body: {}", s),
            Err(_) => println!("  Body: ({} bytes, binary)", frame.body.len()),
        }
    }
    print!("> ");
    let _ = io::stdout().flush();
}

/// Map a connection error to a user-facing message and exit code
pub fn format_connection_error(err: &ConnError, target: &str) -> (String, u8) {
    match err {
        ConnError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", target),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", target),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnError::Timeout(msg) => (
            format!("Connection timed out: {} ({})", target, msg),
            exit_codes::NETWORK_ERROR,
        ),
        ConnError::ServerRejected(server_err) => {
            let mut message = format!("Authentication failed: {}", server_err.message);
            if let Some(body) = &server_err.body {
                message.push_str(&format!(" ({})", body));
            }
            (message, exit_codes::AUTH_ERROR)
        }
        ConnError::Usage(msg) => (msg.clone(), exit_codes::NETWORK_ERROR),
        other => (format!("Protocol error: {}", other), exit_codes::PROTOCOL_ERROR),
    }
}
