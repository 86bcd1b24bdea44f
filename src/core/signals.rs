//! # Signal routing: OS signals to supervisor control events.
//!
//! The router installs handlers for the two lifecycle signals and forwards
//! them as [`ControlEvent`]s over an unbounded channel. All interpretation
//! happens on the supervisor side; the handler side only enqueues.
//!
//! | Signal    | First occurrence  | Second occurrence        |
//! |-----------|-------------------|--------------------------|
//! | `SIGTERM` | `Stop`            | `ForceStop`              |
//! | `SIGUSR1` | `Restart`         | `Restart` (supervisor ignores it outside `Running`) |
//!
//! [`Control`] is the programmatic twin: embedders and tests inject the
//! same events without raw signals.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::error::ServeError;

/// A lifecycle request consumed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    Stop,
    ForceStop,
    Restart,
}

/// Cloneable handle for driving the supervisor without OS signals.
///
/// All methods are best-effort: once the supervisor has exited they are
/// no-ops.
#[derive(Clone)]
pub struct Control {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl Control {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self { tx }
    }

    /// Requests a graceful stop (the `SIGTERM` path).
    pub fn stop(&self) {
        let _ = self.tx.send(ControlEvent::Stop);
    }

    /// Requests immediate termination (the second-`SIGTERM` path).
    pub fn force_stop(&self) {
        let _ = self.tx.send(ControlEvent::ForceStop);
    }

    /// Requests a graceful restart (the `SIGUSR1` path).
    pub fn restart(&self) {
        let _ = self.tx.send(ControlEvent::Restart);
    }
}

/// Installs the OS handlers and spawns the forwarder task.
///
/// The forwarder owns the double-`SIGTERM` state: the first becomes
/// [`ControlEvent::Stop`], every later one [`ControlEvent::ForceStop`].
pub(crate) fn install(tx: mpsc::UnboundedSender<ControlEvent>) -> Result<(), ServeError> {
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|source| ServeError::SignalSetup { source })?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).map_err(|source| ServeError::SignalSetup { source })?;

    tokio::spawn(async move {
        let mut term_seen = false;
        loop {
            let event = tokio::select! {
                recv = sigterm.recv() => match recv {
                    Some(()) => {
                        if term_seen {
                            ControlEvent::ForceStop
                        } else {
                            term_seen = true;
                            ControlEvent::Stop
                        }
                    }
                    None => break,
                },
                recv = sigusr1.recv() => match recv {
                    Some(()) => ControlEvent::Restart,
                    None => break,
                },
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn control_handle_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctl = Control::new(tx);

        ctl.stop();
        ctl.restart();
        ctl.force_stop();

        assert_eq!(rx.recv().await, Some(ControlEvent::Stop));
        assert_eq!(rx.recv().await, Some(ControlEvent::Restart));
        assert_eq!(rx.recv().await, Some(ControlEvent::ForceStop));
    }

    #[tokio::test]
    async fn control_is_a_noop_after_receiver_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctl = Control::new(tx);
        drop(rx);
        ctl.stop();
    }

    #[tokio::test]
    async fn double_term_escalates_to_force() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        install(tx).unwrap();

        // Raise SIGTERM against ourselves twice; the forwarder escalates
        // the second delivery.
        unsafe { libc::kill(std::process::id() as i32, libc::SIGTERM) };
        assert_eq!(rx.recv().await, Some(ControlEvent::Stop));

        unsafe { libc::kill(std::process::id() as i32, libc::SIGTERM) };
        assert_eq!(rx.recv().await, Some(ControlEvent::ForceStop));
    }
}
