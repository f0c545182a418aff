use stompwire::Connection;
use tokio::sync::mpsc;

/// Result of executing a command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Error executing command
    Error(String),
}

/// A parsed interactive command.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Quit,
    Help,
    Send { destination: &'a str, body: &'a str },
    Subscribe(&'a str),
    Unknown(&'a str),
    Malformed(&'static str),
}

pub fn parse_input(line: &str) -> Input<'_> {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    match parts[..] {
        [""] | [] => Input::Empty,
        ["quit" | "exit" | "q", ..] => Input::Quit,
        ["help" | "?", ..] => Input::Help,
        ["send", destination, body] => Input::Send { destination, body },
        ["send", ..] => Input::Malformed("Usage: send <destination> <message>"),
        ["sub" | "subscribe", destination, ..] => Input::Subscribe(destination),
        ["sub" | "subscribe"] => Input::Malformed("Usage: sub <destination>"),
        [other, ..] => Input::Unknown(other),
    }
}

/// Parse and execute a command
pub async fn execute_command(
    line: &str,
    conn: &Connection,
    sub_tx: &mpsc::Sender<String>,
) -> CommandResult {
    match parse_input(line) {
        Input::Empty => CommandResult::Ok,
        Input::Quit => CommandResult::Quit,
        Input::Help => {
            print_help();
            CommandResult::Ok
        }
        Input::Send { destination, body } => {
            match conn.send(destination, "text/plain", body.as_bytes()).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }
        Input::Subscribe(destination) => {
            // Send subscription request to the subscription manager
            if sub_tx.send(destination.to_string()).await.is_err() {
                return CommandResult::Error("Failed to request subscription".to_string());
            }
            CommandResult::Ok
        }
        Input::Unknown(cmd) => {
            CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", cmd))
        }
        Input::Malformed(usage) => CommandResult::Error(usage.to_string()),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  help                          - Show this help");
    println!("  quit                          - Disconnect and exit");
}
