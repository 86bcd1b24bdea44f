//! # Connection handler abstraction and function-backed implementation.
//!
//! This module defines the [`Handler`] trait (async, cancelable) and a
//! convenient function-backed implementation [`HandlerFn`]. The common
//! handle type is [`HandlerRef`], an `Arc<dyn Handler>` shared by every
//! dispatch worker.
//!
//! A handler receives the established [`Stream`] (TLS handshake already
//! complete), the peer address, and a [`CancellationToken`]. The runtime
//! severs uncooperative handlers on forced stop by dropping their future,
//! which closes the stream; handlers that want to exit cleanly can watch
//! the token instead.

use std::{future::Future, sync::Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ConnError;
use crate::net::{PeerAddr, Stream};

/// # Shared handle to a handler object.
///
/// This is the type the supervisor and dispatch workers hold.
pub type HandlerRef = std::sync::Arc<dyn Handler>;

/// # The application side of a connection.
///
/// One call per accepted connection, run on its own worker. Framing and
/// protocol are entirely the handler's business; the runtime only provides
/// the byte stream.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
/// use tokio_util::sync::CancellationToken;
/// use connvisor::{ConnError, Handler, PeerAddr, Stream};
///
/// struct EchoLine;
///
/// #[async_trait]
/// impl Handler for EchoLine {
///     async fn handle(
///         &self,
///         stream: Stream,
///         _peer: PeerAddr,
///         _ctx: CancellationToken,
///     ) -> Result<(), ConnError> {
///         let (read, mut write) = tokio::io::split(stream);
///         let mut lines = BufReader::new(read).lines();
///         while let Some(line) = lines.next_line().await? {
///             write.write_all(line.as_bytes()).await?;
///             write.write_all(b"\n").await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Serves one connection until the peer is done or the token fires.
    ///
    /// Errors are confined to this connection: the worker logs them,
    /// closes the stream and deregisters.
    async fn handle(
        &self,
        stream: Stream,
        peer: PeerAddr,
        ctx: CancellationToken,
    ) -> Result<(), ConnError>;
}

/// # Function-backed handler implementation.
///
/// [`HandlerFn`] wraps a closure `Fnc: FnMut(Stream, PeerAddr,
/// CancellationToken) -> Fut`. The closure is protected by a [`Mutex`] so
/// `handle(&self, ...)` can be called from many workers even though the
/// closure is `FnMut`; the lock is held only while creating the future,
/// never across its execution.
///
/// # Example
/// ```
/// use tokio::io::AsyncWriteExt;
/// use tokio_util::sync::CancellationToken;
/// use connvisor::{ConnError, HandlerFn, HandlerRef, PeerAddr, Stream};
///
/// let greeter: HandlerRef = HandlerFn::arc(
///     |mut stream: Stream, _peer: PeerAddr, _ctx: CancellationToken| async move {
///         stream.write_all(b"hello\n").await?;
///         Ok::<_, ConnError>(())
///     },
/// );
/// ```
pub struct HandlerFn<Fnc, Fut>
where
    Fnc: FnMut(Stream, PeerAddr, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ConnError>> + Send + 'static,
{
    func: Mutex<Fnc>,
}

impl<Fnc, Fut> HandlerFn<Fnc, Fut>
where
    Fnc: FnMut(Stream, PeerAddr, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ConnError>> + Send + 'static,
{
    /// Creates a new function-backed handler.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need a
    /// [`HandlerRef`].
    pub fn new(func: Fnc) -> Self {
        Self {
            func: Mutex::new(func),
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(func: Fnc) -> HandlerRef {
        std::sync::Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<Fnc, Fut> Handler for HandlerFn<Fnc, Fut>
where
    Fnc: FnMut(Stream, PeerAddr, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ConnError>> + Send + 'static,
{
    async fn handle(
        &self,
        stream: Stream,
        peer: PeerAddr,
        ctx: CancellationToken,
    ) -> Result<(), ConnError> {
        let fut = {
            let mut f = self.func.lock().map_err(|_| ConnError::HandlerFailed {
                reason: "handler mutex poisoned".into(),
            })?;
            (f)(stream, peer, ctx)
        };
        fut.await
    }
}
