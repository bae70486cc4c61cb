//! The byte-stream abstraction the handshake hands to the connection engine.
//!
//! The engine never downcasts to `TcpStream`-specific behavior; everything downstream of the
//! handshake talks to a `WebSocketStream`, which is either a plain TCP socket or a
//! `tokio-rustls` TLS stream around one.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

/// A full-duplex byte stream, plain or TLS, client or server side.
pub enum WebSocketStream {
    Plain(TcpStream),
    ClientTls(Box<ClientTlsStream<TcpStream>>),
    ServerTls(Box<ServerTlsStream<TcpStream>>),
}

impl WebSocketStream {
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match self {
            WebSocketStream::Plain(s) => s.peer_addr(),
            WebSocketStream::ClientTls(s) => s.get_ref().0.peer_addr(),
            WebSocketStream::ServerTls(s) => s.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for WebSocketStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WebSocketStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            WebSocketStream::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            WebSocketStream::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WebSocketStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WebSocketStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            WebSocketStream::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            WebSocketStream::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WebSocketStream::Plain(s) => Pin::new(s).poll_flush(cx),
            WebSocketStream::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            WebSocketStream::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WebSocketStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            WebSocketStream::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            WebSocketStream::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
