//! # Supervisor: the signal-driven server lifecycle engine.
//!
//! The [`Supervisor`] owns the runtime components (event bus, subscriber
//! fan-out, connection registry, control channel) and drives one listener
//! from bind-or-inherit through accept, drain and exit.
//!
//! ## States
//! ```text
//! Running ──StopRequested────────► Draining ──count()==0──► Terminating
//!    │                               ▲  │
//!    ├──RestartRequested► Restarting─┘  └──ForceStopRequested──► Terminating
//!    │                        │ (successor confirmed; predecessor drains)
//!    │                        └──handover failed──► back to Running
//!    └──ForceStopRequested──────────────────────────► Terminating
//! ```
//!
//! ## Rules
//! - A connection accepted before a stop is observed runs to completion
//!   on the graceful path.
//! - The listener descriptor is never closed during a handover; the
//!   successor holds its own copy before the predecessor stops accepting.
//! - The PID file always names a process that holds (or is about to
//!   hold) the listener: the successor's overwrite is the readiness
//!   signal, and an aborted handover rewrites the file immediately.
//! - Forced stop severs workers by cancelling their tokens and exits
//!   without further grace.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::core::acceptor::AcceptLoop;
use crate::core::dispatch::Dispatcher;
use crate::core::handover;
use crate::core::pidfile::PidFile;
use crate::core::registry::{ConnectionRegistry, DrainOutcome};
use crate::core::signals::{self, Control, ControlEvent};
use crate::error::ServeError;
use crate::events::{Bus, Event, EventKind};
use crate::handler::HandlerRef;
use crate::net::{Listener, ListenerKind};
use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};

/// Lifecycle state of a running supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ServerState {
    Running,
    Draining,
    Restarting,
    Terminating,
}

/// Outcome of waiting for a restart successor.
enum Takeover {
    /// Successor rewrote the PID file; its PID.
    Completed(u32),
    /// Successor never took over; reason.
    Failed(String),
    /// A forced stop arrived mid-handover.
    Forced,
}

/// Orchestrates one server instance: listener, registry, signals, PID
/// file, drain and handover.
pub struct Supervisor {
    cfg: ServerConfig,
    handler: HandlerRef,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    registry: Arc<ConnectionRegistry>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlEvent>>>,
}

impl Supervisor {
    /// Creates a supervisor with the given config, handler and
    /// subscribers (maybe empty).
    pub fn new(
        cfg: ServerConfig,
        handler: HandlerRef,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            bus,
            handler,
            subs,
            registry: Arc::new(ConnectionRegistry::new()),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            cfg,
        }
    }

    /// Creates a supervisor with the built-in line logger at the
    /// configured level as its only subscriber.
    pub fn with_logging(cfg: ServerConfig, handler: HandlerRef) -> Self {
        let log: Arc<dyn Subscribe> = Arc::new(LogWriter::stdout(cfg.log_level));
        Self::new(cfg, handler, vec![log])
    }

    /// Returns a handle that injects the same lifecycle events the OS
    /// signals produce.
    pub fn control(&self) -> Control {
        Control::new(self.control_tx.clone())
    }

    /// Number of currently-serving connections.
    pub fn connections(&self) -> usize {
        self.registry.count()
    }

    /// Runs the server: adopt an inherited listener when the handover
    /// environment names one, bind fresh otherwise, then serve until a
    /// stop completes.
    ///
    /// Fatal startup errors ([`ServeError::BindFailed`],
    /// [`ServeError::InheritFailed`], [`ServeError::ConfigurationInvalid`])
    /// return before the PID file is written; callers map them to a
    /// non-zero exit.
    pub async fn run(&self) -> Result<(), ServeError> {
        self.cfg.validate()?;
        let listener = match handover::inherited_from_env()? {
            Some(inherited) => Listener::inherit(inherited.fd, inherited.kind, &self.cfg.bind)?,
            None => Listener::bind(&self.cfg.bind).await?,
        };
        self.run_with(listener).await
    }

    /// Runs the server on an externally constructed listener.
    ///
    /// Installs the signal handlers, writes the PID file and enters the
    /// accept loop. Returns `Ok(())` for every graceful path, including a
    /// forced second stop.
    pub async fn run_with(&self, listener: Listener) -> Result<(), ServeError> {
        self.cfg.validate()?;
        signals::install(self.control_tx.clone())?;
        let mut pidfile = PidFile::write(&self.cfg.pid_path)?;
        self.serve(listener, &mut pidfile).await
    }

    async fn serve(&self, listener: Listener, pidfile: &mut PidFile) -> Result<(), ServeError> {
        let mut controls = self.control_rx.lock().await.take().ok_or_else(|| {
            ServeError::ConfigurationInvalid {
                reason: "supervisor is already running".into(),
            }
        })?;

        self.subscriber_listener();

        let fd = listener.raw_fd();
        let kind = listener.kind();
        let listen_addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| self.cfg.bind.to_string());
        self.bus.publish(
            Event::now(EventKind::Listening)
                .with_addr(&listen_addr)
                .with_pid(std::process::id()),
        );

        let accept_token = CancellationToken::new();
        let accept = AcceptLoop {
            listener,
            allowlist: self.cfg.allowed_networks.clone(),
            dispatcher: Dispatcher {
                registry: Arc::clone(&self.registry),
                handler: Arc::clone(&self.handler),
                bus: self.bus.clone(),
            },
            bus: self.bus.clone(),
            token: accept_token.clone(),
            handshake_timeout: self.cfg.handshake_timeout,
        };
        let mut accept_task = Some(tokio::spawn(accept.run()));

        let mut state = ServerState::Running;
        let mut handed_over = false;
        let mut result = Ok(());

        loop {
            state = match state {
                ServerState::Running => {
                    let Some(event) = controls.recv().await else {
                        break;
                    };
                    match event {
                        ControlEvent::Stop => {
                            self.bus.publish(Event::now(EventKind::StopRequested));
                            self.stop_accepting(&accept_token, &mut accept_task, false).await;
                            // Pure shutdown releases the socket path; a
                            // handover never reaches this branch.
                            if let Some(path) = self.cfg.bind.unix_path() {
                                let _ = std::fs::remove_file(path);
                            }
                            ServerState::Draining
                        }
                        ControlEvent::ForceStop => {
                            self.bus.publish(Event::now(EventKind::ForceStopRequested));
                            self.stop_accepting(&accept_token, &mut accept_task, true).await;
                            self.abort_connections().await;
                            ServerState::Terminating
                        }
                        ControlEvent::Restart => {
                            self.bus.publish(Event::now(EventKind::RestartRequested));
                            self.bus.publish(
                                Event::now(EventKind::HandoverStarted)
                                    .with_pid(std::process::id()),
                            );
                            ServerState::Restarting
                        }
                    }
                }

                // Accepting continues until the successor is confirmed;
                // no connect is lost if it never comes up.
                ServerState::Restarting => {
                    match self.await_takeover(fd, kind, &mut controls).await {
                        Takeover::Completed(successor) => {
                            pidfile.release();
                            handed_over = true;
                            self.bus.publish(
                                Event::now(EventKind::HandoverCompleted).with_pid(successor),
                            );
                            self.stop_accepting(&accept_token, &mut accept_task, false).await;
                            ServerState::Draining
                        }
                        Takeover::Forced => {
                            self.bus.publish(Event::now(EventKind::ForceStopRequested));
                            self.stop_accepting(&accept_token, &mut accept_task, true).await;
                            self.abort_connections().await;
                            ServerState::Terminating
                        }
                        Takeover::Failed(reason) => {
                            self.bus.publish(
                                Event::now(EventKind::HandoverFailed).with_error(reason),
                            );
                            // The file must point at a live owner again,
                            // whatever a half-started successor wrote.
                            match pidfile.rewrite() {
                                Ok(()) => ServerState::Running,
                                Err(e) => {
                                    result = Err(e);
                                    ServerState::Terminating
                                }
                            }
                        }
                    }
                }

                ServerState::Draining => {
                    self.drain(&mut controls).await;
                    ServerState::Terminating
                }

                ServerState::Terminating => break,
            };
        }

        self.stop_accepting(&accept_token, &mut accept_task, true).await;
        if !handed_over {
            pidfile.remove();
        }
        result
    }

    /// Fans bus events out to the subscriber set.
    ///
    /// Falling behind the broadcast ring is not silent: the skipped count
    /// goes to the subscribers as an `EventsLagged` diagnostic.
    fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit_arc(Arc::new(ev)),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        set.emit_arc(Arc::new(Event::events_lagged(skipped)));
                    }
                }
            }
        });
    }

    /// Cancels the accept loop and waits for the listener to be dropped.
    ///
    /// `force` aborts the loop task instead of joining it, so a stalled
    /// in-flight handshake cannot delay termination.
    async fn stop_accepting(
        &self,
        token: &CancellationToken,
        task: &mut Option<JoinHandle<()>>,
        force: bool,
    ) {
        token.cancel();
        if let Some(handle) = task.take() {
            if force {
                handle.abort();
            }
            let _ = handle.await;
        }
    }

    /// Cancels every connection worker and yields one scheduling round so
    /// the severed streams actually close.
    async fn abort_connections(&self) {
        self.registry.abort_all();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    /// The drain phase: no new connections, existing handlers run to
    /// completion, bounded by `drain_timeout` when configured. A forced
    /// stop cuts it short.
    async fn drain(&self, controls: &mut mpsc::UnboundedReceiver<ControlEvent>) {
        self.bus
            .publish(Event::now(EventKind::DrainStarted).with_count(self.registry.count()));

        let wait = self.registry.wait_until_empty(self.cfg.drain_timeout);
        tokio::pin!(wait);

        let mut controls_open = true;
        let outcome = loop {
            if !controls_open {
                break wait.as_mut().await;
            }
            tokio::select! {
                outcome = &mut wait => break outcome,
                event = controls.recv() => match event {
                    Some(ControlEvent::ForceStop) => {
                        self.bus.publish(Event::now(EventKind::ForceStopRequested));
                        self.abort_connections().await;
                        return;
                    }
                    // A repeated stop or a restart while already stopping
                    // changes nothing.
                    Some(ControlEvent::Stop) | Some(ControlEvent::Restart) => {}
                    None => controls_open = false,
                }
            }
        };

        match outcome {
            DrainOutcome::Drained => self.bus.publish(Event::now(EventKind::Drained)),
            DrainOutcome::DeadlineExceeded => {
                self.bus.publish(
                    Event::now(EventKind::DrainTimedOut).with_count(self.registry.count()),
                );
                self.abort_connections().await;
            }
        }
    }

    /// Spawns the successor and waits for the PID file to name it, while
    /// staying responsive to a forced stop. Accepting continues for the
    /// whole wait; no connect is lost if the successor never comes up.
    async fn await_takeover(
        &self,
        fd: std::os::fd::RawFd,
        kind: ListenerKind,
        controls: &mut mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Takeover {
        let handover = handover::spawn_successor(
            fd,
            kind,
            &self.cfg.start_command,
            std::process::id(),
            &self.cfg.pid_path,
            self.cfg.handover_timeout,
        );
        tokio::pin!(handover);

        let mut controls_open = true;
        let result = loop {
            if !controls_open {
                break handover.as_mut().await;
            }
            tokio::select! {
                res = &mut handover => break res,
                event = controls.recv() => match event {
                    Some(ControlEvent::ForceStop) => return Takeover::Forced,
                    Some(ControlEvent::Stop) | Some(ControlEvent::Restart) => {}
                    None => controls_open = false,
                }
            }
        };

        match result {
            Ok(pid) => Takeover::Completed(pid),
            Err(e) => Takeover::Failed(e.to_string()),
        }
    }
}
