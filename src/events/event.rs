//! # Runtime events emitted by the supervisor, acceptor and workers.
//!
//! [`EventKind`] classifies events across four categories:
//! - **Control events**: lifecycle requests consumed by the supervisor
//!   (stop, forced stop, restart)
//! - **Connection events**: per-connection flow (accepted, closed, denied,
//!   handshake and handler failures, transient accept errors)
//! - **Drain events**: the no-new-connections phase and its outcome
//! - **Handover events**: the restart FD transfer milestones
//!
//! The [`Event`] struct carries optional metadata (connection id, peer,
//! error text, PID, live-connection count) attached through `with_*`
//! builders.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so consumers can order events delivered out-of-order
//! through async channels.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Delivery diagnostics ===
    /// A subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,
    /// A subscriber panicked while processing an event.
    SubscriberPanicked,
    /// A bus receiver fell behind and skipped events.
    EventsLagged,

    // === Control events ===
    /// Graceful stop requested (first SIGTERM or `Control::stop`).
    StopRequested,
    /// Forced stop requested (second SIGTERM or `Control::force_stop`).
    ForceStopRequested,
    /// Graceful restart requested (SIGUSR1 or `Control::restart`).
    RestartRequested,

    // === Listener events ===
    /// The listener is bound (or adopted) and accepting.
    Listening,
    /// A transient accept error; the loop continues.
    AcceptFailed,

    // === Connection events ===
    /// A connection passed filtering and was registered.
    ConnAccepted,
    /// A connection finished and was deregistered.
    ConnClosed,
    /// The application handler returned an error for one connection.
    HandlerFailed,
    /// Remote address outside the allow-list; closed unregistered.
    RemoteDenied,
    /// TLS handshake failed or timed out; closed unregistered.
    HandshakeFailed,

    // === Drain events ===
    /// Accepting stopped; existing connections run to completion.
    DrainStarted,
    /// The registry reached zero live connections.
    Drained,
    /// The optional drain deadline passed; stragglers were severed.
    DrainTimedOut,

    // === Handover events ===
    /// Successor spawn initiated.
    HandoverStarted,
    /// Successor rewrote the PID file; predecessor is draining.
    HandoverCompleted,
    /// Successor failed to take over; predecessor keeps serving.
    HandoverFailed,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Connection id, for per-connection events.
    pub conn: Option<u64>,
    /// Remote peer, for per-connection events.
    pub peer: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Process id, for handover events.
    pub pid: Option<u32>,
    /// Live-connection count, for drain events.
    pub count: Option<usize>,
    /// Listen address, for listener events.
    pub addr: Option<String>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp
    /// and the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            conn: None,
            peer: None,
            error: None,
            pid: None,
            count: None,
            addr: None,
        }
    }

    /// Attaches a connection id.
    pub fn with_conn(mut self, id: u64) -> Self {
        self.conn = Some(id);
        self
    }

    /// Attaches a peer address.
    pub fn with_peer(mut self, peer: impl ToString) -> Self {
        self.peer = Some(peer.to_string());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a process id.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a live-connection count.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Attaches a listen address.
    pub fn with_addr(mut self, addr: impl ToString) -> Self {
        self.addr = Some(addr.to_string());
        self
    }

    /// Creates a subscriber overflow event.
    ///
    /// Emitted when a subscriber's queue is full (or its worker is gone)
    /// and an event is dropped for it.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_error(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_error(format!("subscriber={subscriber}: {info}"))
    }

    /// Creates a lag event for a bus receiver that skipped `skipped`
    /// events.
    pub fn events_lagged(skipped: u64) -> Self {
        Event::now(EventKind::EventsLagged).with_count(skipped as usize)
    }

    /// True for the delivery diagnostics the fan-out must not recurse on.
    pub fn is_delivery_diagnostic(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked | EventKind::EventsLagged
        )
    }
}
