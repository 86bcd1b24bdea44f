//! # The listener abstraction.
//!
//! [`Listener`] is the uniform accept-producing source over the three
//! concrete bindings (TCP, Unix-domain, TLS-over-TCP). It is constructed
//! either by binding fresh ([`Listener::bind`]) or by adopting a
//! descriptor inherited from a predecessor process
//! ([`Listener::inherit`]); in both cases the underlying file handle stays
//! eligible for the next handover.
//!
//! ## Rules
//! - Exactly one listener per server instance.
//! - An inherited handle is never rebound and the Unix socket path is
//!   never unlinked by the successor at takeover.
//! - TLS certificate material is loaded at construction; a listener that
//!   cannot complete handshakes never comes up.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;

use tokio::net::{TcpListener, UnixListener};
use tokio_rustls::TlsAcceptor;

use crate::error::{ConnError, ServeError};
use crate::net::addr::{BindAddress, ListenerKind};
use crate::net::stream::{PeerAddr, Stream};

/// An accepted connection before the TLS step.
pub enum RawStream {
    Tcp(tokio::net::TcpStream),
    Unix(tokio::net::UnixStream),
}

enum ListenerInner {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// A bound (or inherited) listening socket for one server instance.
pub struct Listener {
    inner: ListenerInner,
    kind: ListenerKind,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Binds a fresh listener for the given address.
    ///
    /// A stale Unix socket file left by an unclean shutdown is cleared
    /// first; a path that exists but is not a socket fails the bind.
    pub async fn bind(addr: &BindAddress) -> Result<Self, ServeError> {
        let bind_failed = |source: io::Error| ServeError::BindFailed {
            addr: addr.to_string(),
            source,
        };

        match addr {
            BindAddress::Tcp(sock) => {
                let listener = TcpListener::bind(sock).await.map_err(bind_failed)?;
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                    kind: ListenerKind::Tcp,
                    tls: None,
                })
            }
            BindAddress::Unix(path) => {
                ensure_unix_socket_free(path).await.map_err(bind_failed)?;
                let listener = UnixListener::bind(path).map_err(bind_failed)?;
                Ok(Self {
                    inner: ListenerInner::Unix(listener),
                    kind: ListenerKind::Unix,
                    tls: None,
                })
            }
            BindAddress::Tls(sock, settings) => {
                let acceptor = settings.acceptor()?;
                let listener = TcpListener::bind(sock).await.map_err(bind_failed)?;
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                    kind: ListenerKind::Tls,
                    tls: Some(acceptor),
                })
            }
        }
    }

    /// Adopts an already-bound descriptor handed over by a predecessor.
    ///
    /// The descriptor is not rebound; for Unix bindings the socket path is
    /// left untouched. Fails with [`ServeError::InheritFailed`] when the
    /// advertised kind disagrees with `addr` or the descriptor is not a
    /// listening socket of the right family.
    pub fn inherit(fd: RawFd, kind: ListenerKind, addr: &BindAddress) -> Result<Self, ServeError> {
        if kind != addr.kind() {
            return Err(ServeError::InheritFailed {
                reason: format!(
                    "inherited kind '{kind}' does not match configured bind '{addr}'"
                ),
            });
        }
        let inherit_failed = |what: &str, e: io::Error| ServeError::InheritFailed {
            reason: format!("fd {fd}: {what}: {e}"),
        };

        // The descriptor arrives with FD_CLOEXEC cleared (that is how it
        // survived the exec); restore it so it only crosses the next exec
        // when the next handover marks it again.
        set_inheritable(fd, false).map_err(|e| inherit_failed("restore cloexec", e))?;

        match addr.kind() {
            ListenerKind::Tcp | ListenerKind::Tls => {
                let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
                std_listener
                    .set_nonblocking(true)
                    .map_err(|e| inherit_failed("set nonblocking", e))?;
                let listener = TcpListener::from_std(std_listener)
                    .map_err(|e| inherit_failed("adopt tcp listener", e))?;
                listener
                    .local_addr()
                    .map_err(|e| inherit_failed("not a listening tcp socket", e))?;

                let tls = match addr {
                    BindAddress::Tls(_, settings) => Some(settings.acceptor()?),
                    _ => None,
                };
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                    kind: addr.kind(),
                    tls,
                })
            }
            ListenerKind::Unix => {
                let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) };
                std_listener
                    .set_nonblocking(true)
                    .map_err(|e| inherit_failed("set nonblocking", e))?;
                let listener = UnixListener::from_std(std_listener)
                    .map_err(|e| inherit_failed("adopt unix listener", e))?;
                listener
                    .local_addr()
                    .map_err(|e| inherit_failed("not a listening unix socket", e))?;
                Ok(Self {
                    inner: ListenerInner::Unix(listener),
                    kind: ListenerKind::Unix,
                    tls: None,
                })
            }
        }
    }

    /// The binding family of this listener.
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Local address for the TCP-backed variants. `None` for Unix.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            ListenerInner::Tcp(l) => l.local_addr().ok(),
            ListenerInner::Unix(_) => None,
        }
    }

    /// The underlying descriptor, as handed to a restart successor.
    pub fn raw_fd(&self) -> RawFd {
        match &self.inner {
            ListenerInner::Tcp(l) => l.as_raw_fd(),
            ListenerInner::Unix(l) => l.as_raw_fd(),
        }
    }

    /// Waits for the next raw connection.
    ///
    /// Errors here are per-OS transient accept failures; the caller logs
    /// them and keeps accepting.
    pub async fn accept(&self) -> io::Result<(RawStream, PeerAddr)> {
        match &self.inner {
            ListenerInner::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                Ok((RawStream::Tcp(stream), PeerAddr::Inet(peer)))
            }
            ListenerInner::Unix(l) => {
                let (stream, _) = l.accept().await?;
                Ok((RawStream::Unix(stream), PeerAddr::Unix))
            }
        }
    }

    /// Completes the connection: for TLS bindings this runs the handshake,
    /// otherwise it is a plain wrap. Handshake failures close the raw
    /// stream and are reported per-connection, never as accept errors.
    pub async fn secure(&self, raw: RawStream) -> Result<Stream, ConnError> {
        match (raw, &self.tls) {
            (RawStream::Tcp(stream), Some(acceptor)) => {
                let tls = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| ConnError::HandshakeFailed {
                        reason: e.to_string(),
                    })?;
                Ok(tls.into())
            }
            (RawStream::Tcp(stream), None) => Ok(stream.into()),
            (RawStream::Unix(stream), _) => Ok(stream.into()),
        }
    }
}

/// Clears or restores `FD_CLOEXEC` on a descriptor.
///
/// An inheritable descriptor (flag cleared) survives the fork+exec of the
/// restart successor; everything else keeps close-on-exec.
pub(crate) fn set_inheritable(fd: RawFd, inheritable: bool) -> io::Result<()> {
    // fcntl is the portable Unix surface for this; std has no stable API.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if inheritable {
        flags & !libc::FD_CLOEXEC
    } else {
        flags | libc::FD_CLOEXEC
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Clears a stale socket file so a fresh bind can claim the path.
///
/// A path that exists but is not a Unix socket is left alone and the bind
/// is allowed to fail on it.
async fn ensure_unix_socket_free(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt as _;

    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path already exists and is not a Unix domain socket",
                ));
            }
            tokio::fs::remove_file(path).await
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;

    fn tcp_bind(port: u16) -> BindAddress {
        BindAddress::Tcp(format!("127.0.0.1:{port}").parse().unwrap())
    }

    #[tokio::test]
    async fn bind_twice_fails_with_bind_failed() {
        let listener = Listener::bind(&tcp_bind(0)).await.unwrap();
        let taken = listener.local_addr().unwrap();

        let err = match Listener::bind(&BindAddress::Tcp(taken)).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.as_label(), "serve_bind_failed");
    }

    #[tokio::test]
    async fn inherit_adopts_a_live_tcp_descriptor() {
        let bound = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = bound.local_addr().unwrap();
        let fd = bound.into_raw_fd();

        let listener =
            Listener::inherit(fd, ListenerKind::Tcp, &BindAddress::Tcp(addr)).unwrap();
        assert_eq!(listener.local_addr().unwrap(), addr);

        // The adopted socket still accepts.
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, PeerAddr::Inet(client.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn inherit_rejects_kind_mismatch() {
        let bound = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = bound.local_addr().unwrap();
        let fd = bound.into_raw_fd();

        let err = match Listener::inherit(fd, ListenerKind::Unix, &BindAddress::Tcp(addr)) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.as_label(), "serve_inherit_failed");

        // Close the leaked descriptor; inherit refused ownership.
        unsafe { libc::close(fd) };
    }

    #[tokio::test]
    async fn inheritable_flag_round_trips() {
        let listener = Listener::bind(&tcp_bind(0)).await.unwrap();
        let fd = listener.raw_fd();

        set_inheritable(fd, true).unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);

        set_inheritable(fd, false).unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[tokio::test]
    async fn stale_unix_socket_is_cleared_on_bind() {
        let dir = std::env::temp_dir().join(format!("connvisor-l-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stale.sock");

        let addr = BindAddress::Unix(path.clone());
        drop(Listener::bind(&addr).await.unwrap());
        assert!(path.exists(), "bind should leave the socket path in place");

        // A second bind clears the stale path instead of failing.
        let rebound = Listener::bind(&addr).await;
        assert!(rebound.is_ok());

        drop(rebound);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
