//! # Connection registry: the set of currently-serving connections.
//!
//! The registry is the single shared mutable structure in the runtime.
//! Dispatch workers add themselves on accept and remove themselves on
//! completion (normal or failed); the supervisor reads it during drain.
//!
//! ## Rules
//! - Connection ids are process-unique (monotonic counter).
//! - `count() == 0` gates the supervisor's graceful exit.
//! - `wait_until_empty` is notification-driven, never a busy-wait.
//! - `abort_all` cancels every per-connection token; workers observe the
//!   cancellation, drop their streams and deregister.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::net::PeerAddr;

/// Result of waiting for the registry to empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every registered connection finished.
    Drained,
    /// The deadline passed with connections still live.
    DeadlineExceeded,
}

struct ConnEntry {
    peer: PeerAddr,
    cancel: CancellationToken,
}

/// Tracks live connections between registration and deregistration.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<u64, ConnEntry>,
    next_id: AtomicU64,
    empty: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection, returning its id and the cancellation token the
    /// worker must watch.
    pub fn register(&self, peer: PeerAddr) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.conns.insert(
            id,
            ConnEntry {
                peer,
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    /// Removes a connection. Wakes drain waiters when the registry
    /// becomes empty. Unknown ids are ignored.
    pub fn deregister(&self, id: u64) {
        self.conns.remove(&id);
        if self.conns.is_empty() {
            self.empty.notify_waiters();
        }
    }

    /// Number of currently-serving connections.
    pub fn count(&self) -> usize {
        self.conns.len()
    }

    /// Peer addresses of the live connections, for drain reporting.
    pub fn snapshot(&self) -> Vec<(u64, PeerAddr)> {
        let mut live: Vec<_> = self
            .conns
            .iter()
            .map(|e| (*e.key(), e.value().peer.clone()))
            .collect();
        live.sort_unstable_by_key(|(id, _)| *id);
        live
    }

    /// Cancels every live connection's token.
    ///
    /// Workers select against their token; cancelling drops the handler
    /// future, which closes the stream.
    pub fn abort_all(&self) {
        for entry in self.conns.iter() {
            entry.value().cancel.cancel();
        }
    }

    /// Blocks until the registry is empty or the deadline passes.
    ///
    /// A `None` deadline waits indefinitely.
    pub async fn wait_until_empty(&self, deadline: Option<Duration>) -> DrainOutcome {
        match deadline {
            None => {
                self.empty_wait().await;
                DrainOutcome::Drained
            }
            Some(d) => match tokio::time::timeout(d, self.empty_wait()).await {
                Ok(()) => DrainOutcome::Drained,
                Err(_) => DrainOutcome::DeadlineExceeded,
            },
        }
    }

    async fn empty_wait(&self) {
        loop {
            // Arm the waiter before checking, so a deregister between the
            // check and the await cannot be missed.
            let notified = self.empty.notified();
            if self.conns.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
