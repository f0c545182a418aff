use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::frame::Frame;
use crate::parser::{escape_header_value, parse_frame_slice};

/// Default bound on the command + header section of an inbound frame.
pub const DEFAULT_MAX_HEADER_LEN: usize = 4096;

/// Items produced or consumed by the codecs.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing an empty line (LF or CR-LF) received where a command was
/// expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// native STOMP wire format over a raw byte stream.
///
/// Responsibilities:
/// - Decode incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`.
/// - Support both NUL-terminated frames and frames using the `content-length`
///   header for binary bodies containing NUL bytes.
/// - Reject command/header sections larger than `max_header_len`.
/// - Encode `StompItem` back into bytes and emit `content-length` when the
///   body could not be framed by its NUL terminator alone.
#[derive(Debug, Clone)]
pub struct StompCodec {
    max_header_len: usize,
}

impl StompCodec {
    pub fn new() -> Self {
        Self {
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }

    /// Use a custom bound for the command + header section.
    pub fn with_max_header_len(max_header_len: usize) -> Self {
        Self { max_header_len }
    }

    pub fn max_header_len(&self) -> usize {
        self.max_header_len
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = FrameError;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns
    /// - `Ok(Some(StompItem))` when a full item (frame or heartbeat) was
    ///   decoded and its bytes were consumed from `src`.
    /// - `Ok(None)` when more bytes are required; `src` is left untouched.
    /// - `Err(FrameError)` on protocol errors (unknown command, malformed
    ///   header, bad escape, missing NUL after a content-length body, header
    ///   section overflow).
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.first() {
            None => return Ok(None),
            Some(b'\n') => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            Some(b'\r') => match src.get(1) {
                None => return Ok(None),
                Some(b'\n') => {
                    src.advance(2);
                    return Ok(Some(StompItem::Heartbeat));
                }
                // a lone CR can only start an invalid command; let the parser report it
                Some(_) => {}
            },
            Some(_) => {}
        }

        match parse_frame_slice(src.chunk(), self.max_header_len)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(StompItem::Frame(frame)))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => dst.put_u8(b'\n'),
            StompItem::Frame(frame) => write_frame(&frame, dst),
        }
        Ok(())
    }
}

/// Serialize `frame` in the native wire format into `dst`.
///
/// A `content-length` header is appended when the frame carries none and the
/// body contains a NUL byte or is not valid UTF-8.
pub(crate) fn write_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.extend_from_slice(frame.command.as_str().as_bytes());
    dst.put_u8(b'\n');

    for (k, v) in frame.headers.iter() {
        dst.extend_from_slice(escape_header_value(k).as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(escape_header_value(v).as_bytes());
        dst.put_u8(b'\n');
    }

    if !frame.headers.contains("content-length")
        && (frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err())
    {
        dst.extend_from_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
    }

    dst.put_u8(b'\n');
    dst.extend_from_slice(&frame.body);
    dst.put_u8(0);
}
