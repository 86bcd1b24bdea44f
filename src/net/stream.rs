//! # Accepted connection streams.
//!
//! [`Stream`] is the uniform byte stream handed to the application
//! handler, one variant per listener binding. The TLS variant has already
//! completed its handshake by the time a handler sees it.
//!
//! [`PeerAddr`] is the remote identity used for allow-list filtering and
//! logging. Unix peers have no IP address.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::server::TlsStream;

/// Remote address of an accepted connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerAddr {
    /// IPv4/IPv6 peer (TCP and TLS bindings).
    Inet(SocketAddr),
    /// Unix-domain peer; no routable address.
    Unix,
}

impl PeerAddr {
    /// The peer IP, when there is one.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            PeerAddr::Inet(addr) => Some(addr.ip()),
            PeerAddr::Unix => None,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{addr}"),
            PeerAddr::Unix => f.write_str("unix"),
        }
    }
}

/// A fully-established connection stream.
///
/// Implements [`AsyncRead`] + [`AsyncWrite`] by delegating to the
/// underlying socket, so handlers are written once against `Stream`
/// regardless of the binding.
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Tcp(_) => f.write_str("Stream::Tcp"),
            Stream::Unix(_) => f.write_str("Stream::Unix"),
            Stream::Tls(_) => f.write_str("Stream::Tls"),
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(s: TcpStream) -> Self {
        Stream::Tcp(s)
    }
}

impl From<UnixStream> for Stream {
    fn from(s: UnixStream) -> Self {
        Stream::Unix(s)
    }
}

impl From<TlsStream<TcpStream>> for Stream {
    fn from(s: TlsStream<TcpStream>) -> Self {
        Stream::Tls(Box::new(s))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(inner) => Pin::new(inner).poll_read(cx, buf),
            Stream::Unix(inner) => Pin::new(inner).poll_read(cx, buf),
            Stream::Tls(inner) => Pin::new(inner.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(inner) => Pin::new(inner).poll_write(cx, buf),
            Stream::Unix(inner) => Pin::new(inner).poll_write(cx, buf),
            Stream::Tls(inner) => Pin::new(inner.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(inner) => Pin::new(inner).poll_flush(cx),
            Stream::Unix(inner) => Pin::new(inner).poll_flush(cx),
            Stream::Tls(inner) => Pin::new(inner.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(inner) => Pin::new(inner).poll_shutdown(cx),
            Stream::Unix(inner) => Pin::new(inner).poll_shutdown(cx),
            Stream::Tls(inner) => Pin::new(inner.as_mut()).poll_shutdown(cx),
        }
    }
}
