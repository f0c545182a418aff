use std::fmt;
use std::io;
use thiserror::Error;

use crate::frame::Frame;

/// Errors produced while decoding or encoding frames.
///
/// Any of these is fatal for the connection that produced it: after a framing
/// error the byte stream is assumed to be desynchronized.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The command line is not one of the STOMP commands.
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),
    /// Malformed header line, bad escape, content-length/body mismatch or a
    /// missing NUL terminator.
    #[error("invalid frame format: {0}")]
    Format(String),
    /// The command and header section grew past the configured limit before
    /// the blank separator line was seen.
    #[error("frame header section exceeds {0} bytes")]
    HeaderOverflow(usize),
    /// A bounded read on a message channel expired.
    #[error("timed out waiting for a frame")]
    TimedOut,
    /// Underlying transport failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Structured view of an ERROR frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Value of the `message` header, or `"unknown error"`.
    pub message: String,
    /// Body decoded as UTF-8, when non-empty and valid.
    pub body: Option<String>,
    /// `receipt-id` header, present when the error answers a receipt request.
    pub receipt_id: Option<String>,
    /// The original frame.
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            String::from_utf8(frame.body.clone()).ok()
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
