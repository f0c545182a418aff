//! Transport capability shared by both codec flavours.
//!
//! The connection only needs something that yields decoded [`StompItem`]s and
//! accepts items to write. `Framed<T, StompCodec>` provides that over a byte
//! stream and [`SockJsFramed`] over a message channel.

use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::{StompCodec, StompItem};
use crate::error::FrameError;
use crate::sockjs::{SockJsCodec, SockJsFramed};

/// A bidirectional frame pipe the connection task can own.
pub trait FrameTransport:
    Stream<Item = Result<StompItem, FrameError>>
    + Sink<StompItem, Error = FrameError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> FrameTransport for T where
    T: Stream<Item = Result<StompItem, FrameError>>
        + Sink<StompItem, Error = FrameError>
        + Send
        + Unpin
        + 'static
{
}

/// Wrap a byte stream (TCP socket, duplex pipe) in the native codec.
pub fn stream_transport<T>(io: T, codec: StompCodec) -> Framed<T, StompCodec>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    Framed::new(io, codec)
}

/// Wrap a message channel in the SockJS codec.
pub fn channel_transport<C>(channel: C, codec: SockJsCodec) -> SockJsFramed<C> {
    SockJsFramed::with_codec(channel, codec)
}

#[cfg(feature = "websocket")]
pub use self::websocket::WebSocketChannel;

#[cfg(feature = "websocket")]
mod websocket {
    use futures::{Sink, Stream};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll, ready};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
    use tracing::debug;

    /// A WebSocket seen as a channel of whole messages.
    ///
    /// Text and binary messages are both surfaced as bytes. Control frames are
    /// answered by tungstenite and never reach the caller. Outbound messages
    /// are sent as text when they are valid UTF-8.
    pub struct WebSocketChannel {
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    impl WebSocketChannel {
        /// Dial `url`, adding `headers` to the HTTP upgrade request.
        pub async fn connect(url: &str, headers: &[(String, String)]) -> io::Result<Self> {
            let mut request = url.into_client_request().map_err(io::Error::other)?;
            for (name, value) in headers {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(io::Error::other)?;
                let value = HeaderValue::from_str(value).map_err(io::Error::other)?;
                request.headers_mut().append(name, value);
            }
            let (ws, response) = connect_async(request).await.map_err(io::Error::other)?;
            debug!(status = %response.status(), url, "websocket established");
            Ok(Self { ws })
        }
    }

    impl Stream for WebSocketChannel {
        type Item = io::Result<Vec<u8>>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            loop {
                let next = ready!(Pin::new(&mut self.ws).poll_next(cx));
                return Poll::Ready(match next {
                    Some(Ok(Message::Text(text))) => Some(Ok(text.into_bytes())),
                    Some(Ok(Message::Binary(data))) => Some(Ok(data)),
                    Some(Ok(Message::Close(_))) | None => None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Some(Err(io::Error::other(e))),
                });
            }
        }
    }

    impl Sink<Vec<u8>> for WebSocketChannel {
        type Error = io::Error;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.ws).poll_ready(cx).map_err(io::Error::other)
        }

        fn start_send(mut self: Pin<&mut Self>, item: Vec<u8>) -> io::Result<()> {
            let message = match String::from_utf8(item) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            };
            Pin::new(&mut self.ws)
                .start_send(message)
                .map_err(io::Error::other)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.ws).poll_flush(cx).map_err(io::Error::other)
        }

        fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.ws).poll_close(cx).map_err(io::Error::other)
        }
    }
}
