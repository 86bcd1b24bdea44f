//! # The accept loop.
//!
//! A dedicated worker pulls raw connections from the [`Listener`] and
//! admits them: allow-list check, TLS handshake (bounded), then hand-off
//! to the dispatcher. The supervisor stops the loop by cancelling its
//! token; the loop exits at the next suspension point and drops the
//! listener, after which no new connection can be registered.
//!
//! Per-OS transient accept errors are published and the loop keeps going,
//! with a short breather so an error storm cannot spin it hot.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::dispatch::Dispatcher;
use crate::events::{Bus, Event, EventKind};
use crate::net::{AllowList, Listener, PeerAddr, RawStream};

/// Pause after a transient accept error.
const ACCEPT_ERROR_BREATHER: Duration = Duration::from_millis(100);

pub(crate) struct AcceptLoop {
    pub(crate) listener: Listener,
    pub(crate) allowlist: AllowList,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) bus: Bus,
    pub(crate) token: CancellationToken,
    pub(crate) handshake_timeout: Duration,
}

impl AcceptLoop {
    /// Runs until the token is cancelled. Consumes the listener; dropping
    /// it here closes the socket in this process (a handed-over
    /// descriptor stays open in the successor).
    pub(crate) async fn run(self) {
        loop {
            tokio::select! {
                () = self.token.cancelled() => break,
                res = self.listener.accept() => match res {
                    Ok((raw, peer)) => self.admit(raw, peer).await,
                    Err(e) => {
                        self.bus.publish(
                            Event::now(EventKind::AcceptFailed).with_error(e.to_string()),
                        );
                        tokio::select! {
                            () = self.token.cancelled() => break,
                            () = tokio::time::sleep(ACCEPT_ERROR_BREATHER) => {}
                        }
                    }
                }
            }
        }
    }

    /// Filters and completes one raw connection, then dispatches it.
    ///
    /// Denied remotes and failed handshakes are dropped here, before
    /// registration, so the handler never sees them.
    async fn admit(&self, raw: RawStream, peer: PeerAddr) {
        if !self.allowlist.permits(&peer) {
            self.bus
                .publish(Event::now(EventKind::RemoteDenied).with_peer(&peer));
            return;
        }

        let secured = tokio::time::timeout(self.handshake_timeout, self.listener.secure(raw));
        let stream = match secured.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.bus.publish(
                    Event::now(EventKind::HandshakeFailed)
                        .with_peer(&peer)
                        .with_error(e.to_string()),
                );
                return;
            }
            Err(_) => {
                self.bus.publish(
                    Event::now(EventKind::HandshakeFailed)
                        .with_peer(&peer)
                        .with_error("handshake timed out"),
                );
                return;
            }
        };

        self.dispatcher.spawn(stream, peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::ConnectionRegistry;
    use crate::error::ConnError;
    use crate::handler::HandlerFn;
    use crate::net::{BindAddress, Stream};
    use std::sync::Arc;

    fn echo_nothing() -> crate::handler::HandlerRef {
        HandlerFn::arc(|_s: Stream, _p: PeerAddr, _c: CancellationToken| async move {
            Ok::<_, ConnError>(())
        })
    }

    async fn accept_loop(
        allowlist: AllowList,
    ) -> (std::net::SocketAddr, Arc<ConnectionRegistry>, Bus, CancellationToken) {
        let bind: BindAddress = "tcp://127.0.0.1:0".parse().unwrap();
        let listener = Listener::bind(&bind).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let bus = Bus::new(64);
        let token = CancellationToken::new();

        let accept = AcceptLoop {
            listener,
            allowlist,
            dispatcher: Dispatcher {
                registry: Arc::clone(&registry),
                handler: echo_nothing(),
                bus: bus.clone(),
            },
            bus: bus.clone(),
            token: token.clone(),
            handshake_timeout: Duration::from_secs(1),
        };
        tokio::spawn(accept.run());

        (addr, registry, bus, token)
    }

    #[tokio::test]
    async fn denied_remote_is_never_registered() {
        // 198.51.100.0/24 never matches loopback.
        let allow = AllowList::parse(&["198.51.100.0/24"]).unwrap();
        let (addr, registry, bus, _token) = accept_loop(allow).await;
        let mut rx = bus.subscribe();

        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();

        let denied = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let ev = rx.recv().await.unwrap();
                if ev.kind == EventKind::RemoteDenied {
                    return ev;
                }
            }
        })
        .await
        .expect("expected a remote-denied event");

        assert!(denied.peer.unwrap().starts_with("127.0.0.1"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn cancelling_the_token_stops_accepting() {
        let (addr, _registry, _bus, token) = accept_loop(AllowList::allow_all()).await;

        token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The listener is dropped with the loop; fresh connects are refused.
        let refused = tokio::net::TcpStream::connect(addr).await;
        assert!(refused.is_err());
    }
}
