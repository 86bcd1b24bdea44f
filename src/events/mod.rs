//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the supervisor, the
//! accept loop and the per-connection dispatch workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] broadcast channel with lost-event accounting
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (control, drain, handover), the accept
//!   loop (accepted/denied/handshake/transient), dispatch workers
//!   (closed/failed), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Supervisor::subscriber_listener()`, which fans out to
//!   the `SubscriberSet` and reports broadcast lag as `EventsLagged`.
//!
//! See `core/mod.rs` for the system-level wiring diagram.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
