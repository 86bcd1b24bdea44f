//! Network layer: bind addresses, listeners, streams, filtering.
//!
//! This module groups everything between the configuration and the
//! supervisor's accept loop:
//!
//! - [`BindAddress`] / [`ListenerKind`] parsed `tcp://`, `unix://`,
//!   `tls://` bind URIs and the scheme kind used by the handover contract
//! - [`Listener`] bind-or-inherit accept source over the three bindings
//! - [`Stream`] / [`PeerAddr`] what handlers and the allow-list see
//! - [`AllowList`] / [`CidrBlock`] post-accept remote filtering
//! - [`TlsSettings`] / [`TlsProtocol`] certificate material for `tls://`
//!
//! The supervisor core consumes these; nothing here knows about lifecycle
//! states or the event bus.

mod addr;
mod allowlist;
mod listener;
mod stream;
mod tls;

pub use addr::{BindAddress, ListenerKind};
pub use allowlist::{AllowList, CidrBlock};
pub use listener::{Listener, RawStream};
pub use stream::{PeerAddr, Stream};
pub use tls::{TlsProtocol, TlsSettings};

pub(crate) use listener::set_inheritable;
