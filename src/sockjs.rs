//! Framed-channel codec: STOMP frames carried inside SockJS-style JSON arrays.
//!
//! Each transport message holds a JSON array of strings, optionally wrapped
//! in stray characters (`a["CONNECTED\nversion:1.2\n\n\u0000"]`). Only the
//! first string of an array is decoded. Bodies on this transport are JSON
//! objects, so the usable body is the span from the first `{` to the last
//! `}` of the body section.

use bytes::BytesMut;
use futures::{Sink, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tracing::debug;

use crate::codec::{StompItem, write_frame};
use crate::error::FrameError;
use crate::frame::{Command, Frame, Headers};
use crate::parser::{parse_header_line, trim_cr};

/// Default bound for [`SockJsFramed::read_frame_timeout`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Decoder/encoder for one SockJS transport message.
///
/// By default the decoder is tolerant: a message that does not hold a JSON
/// array of strings is treated like a heartbeat (other control traffic may
/// share the channel). With `strict(true)` such a message is a format error.
/// Dropped messages are logged at `debug` level either way.
#[derive(Debug, Clone)]
pub struct SockJsCodec {
    strict: bool,
    read_timeout: Duration,
}

impl Default for SockJsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SockJsCodec {
    pub fn new() -> Self {
        Self {
            strict: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Fail on malformed JSON instead of skipping the message.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Decode one transport message.
    ///
    /// Returns `Ok(None)` for heartbeats and for messages that carry no STOMP
    /// frame (empty array, SockJS open/heartbeat markers, tolerated garbage).
    pub fn decode_message(&self, message: &[u8]) -> Result<Option<Frame>, FrameError> {
        let span = bracket_span(trim_eol(message));
        if span.len() < 2 {
            return Ok(None);
        }

        let Some(mut texts) = parse_string_array(span) else {
            if self.strict {
                return Err(FrameError::Format(format!(
                    "message is not a JSON array of strings: {:?}",
                    String::from_utf8_lossy(span)
                )));
            }
            debug!(
                message = %String::from_utf8_lossy(message),
                "dropping channel message without a STOMP payload"
            );
            return Ok(None);
        };

        if texts.is_empty() {
            return Ok(None);
        }
        if texts.len() > 1 {
            debug!(
                extra = texts.len() - 1,
                "only the first frame of a multi-frame message is decoded"
            );
        }
        let text = texts.swap_remove(0);

        // an array holding only line breaks is a STOMP heartbeat
        if text.bytes().all(|b| b == b'\n' || b == b'\r') {
            return Ok(None);
        }

        let (head, body) = match text.split_once("\n\n") {
            Some((head, body)) => (head, Some(body)),
            None => (text.as_str(), None),
        };

        let mut lines = head.split('\n');
        let command = Command::from_bytes(trim_cr(lines.next().unwrap_or_default().as_bytes()))?;

        let mut headers = Headers::new();
        for line in lines {
            let line = trim_cr(line.as_bytes());
            if line.is_empty() {
                break;
            }
            let (name, value) = parse_header_line(line)?;
            headers.add(name, value);
        }

        let body = body.map(|b| json_object_span(b.as_bytes())).unwrap_or_default();

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }

    /// Encode a frame as a single-element JSON array.
    ///
    /// The frame text is the native wire rendering (escaped headers, blank
    /// line, body, NUL). JSON strings cannot carry arbitrary bytes, so the
    /// body must be valid UTF-8.
    pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, FrameError> {
        let mut buf = BytesMut::new();
        write_frame(frame, &mut buf);
        let text = String::from_utf8(buf.to_vec()).map_err(|_| {
            FrameError::Format("frames sent over a SockJS channel need a UTF-8 body".to_string())
        })?;
        serde_json::to_vec(&[text]).map_err(|e| FrameError::Format(e.to_string()))
    }

    /// A STOMP heartbeat wrapped in the array envelope.
    pub fn encode_heartbeat(&self) -> Vec<u8> {
        b"[\"\\n\"]".to_vec()
    }
}

/// Strip one trailing LF or CR-LF.
fn trim_eol(message: &[u8]) -> &[u8] {
    let message = message.strip_suffix(b"\n").unwrap_or(message);
    trim_cr(message)
}

/// Shrink `message` from both ends until it starts with `[` and ends with `]`.
///
/// Unbalanced input may shrink to one byte or less; callers treat that as a
/// heartbeat.
fn bracket_span(message: &[u8]) -> &[u8] {
    let mut span = message;
    while span.len() > 1 && (span[0] != b'[' || span[span.len() - 1] != b']') {
        if span[0] != b'[' {
            span = &span[1..];
        }
        if let Some((&last, rest)) = span.split_last() {
            if last != b']' {
                span = rest;
            }
        }
    }
    span
}

/// Parse the first JSON array of strings found in `span`.
///
/// Each `[` is tried in turn and only the JSON value starting there is
/// consumed, so a leading unrelated array (`[123]["..."]`) is skipped.
fn parse_string_array(span: &[u8]) -> Option<Vec<String>> {
    span.iter()
        .enumerate()
        .filter(|(_, b)| **b == b'[')
        .find_map(|(start, _)| {
            serde_json::Deserializer::from_slice(&span[start..])
                .into_iter::<Vec<String>>()
                .next()
                .and_then(Result::ok)
        })
}

/// Inclusive span from the first `{` to the last `}`; empty when absent.
fn json_object_span(body: &[u8]) -> Vec<u8> {
    let first = body.iter().position(|&b| b == b'{');
    let last = body.iter().rposition(|&b| b == b'}');
    match (first, last) {
        (Some(first), Some(last)) if first <= last => body[first..=last].to_vec(),
        _ => Vec::new(),
    }
}

/// Adapts a message channel into a frame transport.
///
/// `C` yields whole transport messages and accepts whole messages; the
/// adapter applies [`SockJsCodec`] in both directions so the result has the
/// same `Stream`/`Sink` shape as `Framed<T, StompCodec>`.
pub struct SockJsFramed<C> {
    inner: C,
    codec: SockJsCodec,
}

impl<C> SockJsFramed<C> {
    pub fn new(inner: C) -> Self {
        Self::with_codec(inner, SockJsCodec::new())
    }

    pub fn with_codec(inner: C, codec: SockJsCodec) -> Self {
        Self { inner, codec }
    }

    pub fn codec(&self) -> &SockJsCodec {
        &self.codec
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C> SockJsFramed<C>
where
    C: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    /// Read the next frame, skipping heartbeats, bounded by the codec's
    /// read timeout.
    pub async fn read_frame_timeout(&mut self) -> Result<Frame, FrameError> {
        let limit = self.codec.read_timeout;
        let read = async {
            loop {
                match self.next().await {
                    Some(Ok(StompItem::Frame(frame))) => return Ok(frame),
                    Some(Ok(StompItem::Heartbeat)) => continue,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(FrameError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "channel closed",
                        )));
                    }
                }
            }
        };
        tokio::time::timeout(limit, read)
            .await
            .map_err(|_| FrameError::TimedOut)?
    }
}

impl<C> Stream for SockJsFramed<C>
where
    C: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    type Item = Result<StompItem, FrameError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(message)) => {
                let item = this
                    .codec
                    .decode_message(&message)
                    .map(|frame| frame.map_or(StompItem::Heartbeat, StompItem::Frame));
                Poll::Ready(Some(item))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(FrameError::Io(e)))),
            None => Poll::Ready(None),
        }
    }
}

impl<C> Sink<StompItem> for SockJsFramed<C>
where
    C: Sink<Vec<u8>, Error = io::Error> + Unpin,
{
    type Error = FrameError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_ready(cx).map_err(FrameError::Io)
    }

    fn start_send(mut self: Pin<&mut Self>, item: StompItem) -> Result<(), Self::Error> {
        let message = match item {
            StompItem::Heartbeat => self.codec.encode_heartbeat(),
            StompItem::Frame(frame) => self.codec.encode_frame(&frame)?,
        };
        Pin::new(&mut self.inner)
            .start_send(message)
            .map_err(FrameError::Io)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(FrameError::Io)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(FrameError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_span_strips_wrappers() {
        assert_eq!(bracket_span(b"a[\"x\"]"), b"[\"x\"]");
        assert_eq!(bracket_span(b"[1]junk"), b"[1]");
        assert_eq!(bracket_span(b"junk[1]"), b"[1]");
    }

    #[test]
    fn unbalanced_input_shrinks_without_panicking() {
        assert!(bracket_span(b"]]]]").len() <= 1);
        assert!(bracket_span(b"[[[[").len() <= 1);
        assert!(bracket_span(b"o").len() <= 1);
        assert!(bracket_span(b"").is_empty());
    }

    #[test]
    fn json_object_span_edges() {
        assert_eq!(json_object_span(b"garbage{\"a\":1}moregarbage"), b"{\"a\":1}");
        assert!(json_object_span(b"no braces").is_empty());
        assert!(json_object_span(b"}backwards{").is_empty());
        assert_eq!(json_object_span(b"{\"a\":{\"b\":2}}\0"), b"{\"a\":{\"b\":2}}");
    }

    #[test]
    fn first_string_array_is_found_after_unrelated_array() {
        let arrays = parse_string_array(b"[123][\"CONNECTED\"]").unwrap();
        assert_eq!(arrays, vec!["CONNECTED".to_string()]);
        assert!(parse_string_array(b"[1,2]").is_none());
    }
}
