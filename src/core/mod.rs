//! Runtime core: lifecycle orchestration.
//!
//! This module contains the embedded implementation of the connvisor
//! runtime. The public API re-exported from here is [`Supervisor`],
//! [`Control`], the [`ConnectionRegistry`] surface and the PID/handover
//! plumbing; the accept loop and dispatcher are internal building blocks
//! the supervisor wires together.
//!
//! ## Files & responsibilities
//! - **supervisor.rs**: the state machine; owns Bus, registry and control
//!   channel; bind-or-inherit startup; drain; handover orchestration.
//! - **acceptor.rs**: the accept loop worker; allow-list check, bounded
//!   TLS handshake, transient-error breather.
//! - **dispatch.rs**: per-connection worker; register, run handler,
//!   always deregister; severs on cancellation.
//! - **registry.rs**: live-connection set; notification-driven
//!   `wait_until_empty`; `abort_all` for forced stop.
//! - **signals.rs**: SIGTERM/SIGUSR1 to control events; double-TERM
//!   escalation; programmatic [`Control`] twin.
//! - **pidfile.rs**: atomic write-then-rename PID records with ownership
//!   tracking across handover.
//! - **handover.rs**: successor spawn with the inherited-FD environment
//!   contract and the bounded PID-file readiness wait.
//!
//! ## Wiring (module-level flow)
//! ```text
//! signals::install() ──► ControlEvent channel ──► Supervisor::serve()
//!                                                   │
//!          ┌────────────────────────────────────────┤
//!          ▼                                        ▼
//!   AcceptLoop::run()                       state machine loop
//!     │  allow-list / tls handshake          Running → Draining
//!     ▼                                      Running → Restarting → Draining
//!   Dispatcher::spawn()                      any     → Terminating (forced)
//!     │ register                                     │
//!     ▼                                              ▼
//!   ConnectionRegistry ◄───── wait_until_empty ── drain
//!     │ deregister on worker exit
//!     ▼
//!   Bus ──► Supervisor::subscriber_listener() ──► SubscriberSet
//! ```
//!
//! ## Shutdown timeline
//! ```text
//! SIGTERM → Stop → accept loop cancelled, listener closed
//!         → drain: wait_until_empty (optional deadline)
//!         → pid file removed → exit 0
//! SIGTERM×2 → ForceStop → abort_all: tokens cancelled, streams dropped
//!         → exit 0 within bounded slack
//! SIGUSR1 → Restart → successor spawned with SERVER_INHERITED_FD/KIND
//!         → pid file names successor → predecessor drains → exit 0
//!         (failure: pid file rewritten, back to Running)
//! ```

mod acceptor;
mod dispatch;
mod handover;
mod pidfile;
mod registry;
mod signals;
mod supervisor;

pub use handover::{
    inherited_from_env, InheritedListener, INHERITED_FD_ENV, INHERITED_KIND_ENV,
};
pub use pidfile::PidFile;
pub use registry::{ConnectionRegistry, DrainOutcome};
pub use signals::Control;
pub use supervisor::Supervisor;
