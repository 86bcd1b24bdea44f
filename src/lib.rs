//! # connvisor
//!
//! **Connvisor** is a connection-supervising server runtime. Its
//! distinguishing feature is uninterruptible graceful restart and
//! shutdown: an operator can hot-upgrade the binary or configuration, or
//! stop the server, without dropping an in-flight connection and without
//! losing the listening socket.
//!
//! ## Features
//!
//! | Area              | Description                                                        | Key types / traits                  |
//! |-------------------|--------------------------------------------------------------------|-------------------------------------|
//! | **Supervision**   | Signal-driven lifecycle: drain on stop, FD handover on restart.    | [`Supervisor`], [`Control`]         |
//! | **Listeners**     | One accept surface over TCP, Unix-domain and TLS bindings.         | [`Listener`], [`BindAddress`]       |
//! | **Handlers**      | Application code as an async per-connection function or trait.     | [`Handler`], [`HandlerFn`]          |
//! | **Filtering**     | CIDR allow-list applied before the handler ever runs.              | [`AllowList`], [`CidrBlock`]        |
//! | **Observability** | Typed lifecycle events fanned out to subscribers.                  | [`Subscribe`], [`LogWriter`]        |
//! | **Errors**        | Typed fatal and per-connection errors with stable labels.          | [`ServeError`], [`ConnError`]       |
//!
//! ## Signals
//!
//! `SIGTERM` drains and exits (a second `SIGTERM` forces immediate
//! termination); `SIGUSR1` spawns a successor process, hands it the
//! listening descriptor through `SERVER_INHERITED_FD` /
//! `SERVER_INHERITED_KIND`, and drains once the successor has rewritten
//! the PID file.
//!
//! ```no_run
//! use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
//! use tokio_util::sync::CancellationToken;
//! use connvisor::{ConnError, HandlerFn, PeerAddr, ServerConfig, Stream, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = ServerConfig::new("tcp://127.0.0.1:6789".parse()?);
//!
//!     let echo = HandlerFn::arc(
//!         |stream: Stream, _peer: PeerAddr, _ctx: CancellationToken| async move {
//!             let (read, mut write) = tokio::io::split(stream);
//!             let mut lines = BufReader::new(read).lines();
//!             while let Some(line) = lines.next_line().await? {
//!                 write.write_all(line.as_bytes()).await?;
//!                 write.write_all(b"\n").await?;
//!             }
//!             Ok::<_, ConnError>(())
//!         },
//!     );
//!
//!     Supervisor::with_logging(cfg, echo).run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod handler;
mod net;
mod subscribers;

// ---- Public re-exports ----

pub use config::ServerConfig;
pub use crate::core::{
    inherited_from_env, Control, ConnectionRegistry, DrainOutcome, InheritedListener, PidFile,
    Supervisor, INHERITED_FD_ENV, INHERITED_KIND_ENV,
};
pub use error::{ConnError, ServeError};
pub use events::{Bus, Event, EventKind};
pub use handler::{Handler, HandlerFn, HandlerRef};
pub use net::{
    AllowList, BindAddress, CidrBlock, Listener, ListenerKind, PeerAddr, RawStream, Stream,
    TlsProtocol, TlsSettings,
};
pub use subscribers::{LogLevel, LogWriter, Subscribe, SubscriberSet};
