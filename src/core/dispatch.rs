//! # Handler dispatch: one worker per accepted connection.
//!
//! For each admitted connection the dispatcher registers it, spawns a
//! worker that invokes the application handler, and deregisters on
//! completion. Handler failures are published and confined to their
//! connection.
//!
//! The worker selects the handler future against the connection's
//! cancellation token: on forced stop the token fires, the handler future
//! is dropped, and dropping it closes the stream. Handlers therefore
//! cannot outlive termination even when they ignore the token.

use std::sync::Arc;

use crate::core::registry::ConnectionRegistry;
use crate::events::{Bus, Event, EventKind};
use crate::handler::HandlerRef;
use crate::net::{PeerAddr, Stream};

/// Spawns and accounts for per-connection workers.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) handler: HandlerRef,
    pub(crate) bus: Bus,
}

impl Dispatcher {
    /// Registers the connection and runs the handler on its own task.
    ///
    /// Deregistration is unconditional: normal return, handler error and
    /// forced severing all end in the same place.
    pub(crate) fn spawn(&self, stream: Stream, peer: PeerAddr) {
        let (id, cancel) = self.registry.register(peer.clone());
        self.bus
            .publish(Event::now(EventKind::ConnAccepted).with_conn(id).with_peer(&peer));

        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(&self.handler);
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                res = handler.handle(stream, peer.clone(), cancel.clone()) => Some(res),
                () = cancel.cancelled() => None,
            };

            match outcome {
                Some(Ok(())) => {
                    bus.publish(Event::now(EventKind::ConnClosed).with_conn(id));
                }
                Some(Err(e)) => {
                    bus.publish(
                        Event::now(EventKind::HandlerFailed)
                            .with_conn(id)
                            .with_peer(&peer)
                            .with_error(e.to_string()),
                    );
                    bus.publish(Event::now(EventKind::ConnClosed).with_conn(id));
                }
                None => {
                    bus.publish(
                        Event::now(EventKind::ConnClosed)
                            .with_conn(id)
                            .with_error("severed"),
                    );
                }
            }

            registry.deregister(id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnError;
    use crate::handler::HandlerFn;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    async fn loopback_pair() -> (Stream, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Stream::Tcp(server), client)
    }

    fn peer() -> PeerAddr {
        PeerAddr::Inet(SocketAddr::from(([127, 0, 0, 1], 40000)))
    }

    fn dispatcher(handler: HandlerRef) -> Dispatcher {
        Dispatcher {
            registry: Arc::new(ConnectionRegistry::new()),
            handler,
            bus: Bus::new(64),
        }
    }

    #[tokio::test]
    async fn worker_deregisters_after_handler_returns() {
        let handler = HandlerFn::arc(
            |mut stream: Stream, _p: PeerAddr, _c: CancellationToken| async move {
                stream.write_all(b"bye\n").await?;
                Ok::<_, ConnError>(())
            },
        );
        let d = dispatcher(handler);
        let (server, _client) = loopback_pair().await;

        d.spawn(server, peer());
        assert_eq!(d.registry.count(), 1);

        d.registry.wait_until_empty(Some(Duration::from_secs(1))).await;
        assert_eq!(d.registry.count(), 0);
    }

    #[tokio::test]
    async fn handler_error_still_deregisters_and_publishes() {
        let handler = HandlerFn::arc(
            |_s: Stream, _p: PeerAddr, _c: CancellationToken| async move {
                Err::<(), _>(ConnError::handler("boom"))
            },
        );
        let d = dispatcher(handler);
        let mut rx = d.bus.subscribe();
        let (server, _client) = loopback_pair().await;

        d.spawn(server, peer());
        d.registry.wait_until_empty(Some(Duration::from_secs(1))).await;

        let mut saw_failure = false;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::HandlerFailed {
                assert_eq!(ev.error.as_deref(), Some("handler failed: boom"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        assert_eq!(d.registry.count(), 0);
    }

    #[tokio::test]
    async fn cancellation_severs_a_stuck_handler() {
        let handler = HandlerFn::arc(
            |_s: Stream, _p: PeerAddr, _c: CancellationToken| async move {
                // Ignores the token on purpose; the worker's select severs it.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, ConnError>(())
            },
        );
        let d = dispatcher(handler);
        let (server, _client) = loopback_pair().await;

        d.spawn(server, peer());
        assert_eq!(d.registry.count(), 1);

        d.registry.abort_all();
        let out = d
            .registry
            .wait_until_empty(Some(Duration::from_millis(500)))
            .await;
        assert_eq!(out, crate::core::registry::DrainOutcome::Drained);
    }
}
