//! # Restart handover: transferring the listener to a successor process.
//!
//! The handover never closes the listening descriptor; it is marked
//! inheritable, the successor is spawned from the configured argv with the
//! descriptor's identity in the environment, and the predecessor waits
//! (bounded) for the successor to rewrite the PID file with its own PID.
//! Only then does the predecessor stop accepting.
//!
//! ## Environment contract
//! - [`INHERITED_FD_ENV`] (`SERVER_INHERITED_FD`): decimal descriptor
//!   number of the listener.
//! - [`INHERITED_KIND_ENV`] (`SERVER_INHERITED_KIND`): `tcp`, `unix` or
//!   `tls`.
//!
//! Both absent means a fresh start; both present means inherit; anything
//! else is a fatal inherit failure.

use std::os::fd::RawFd;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::core::pidfile::PidFile;
use crate::error::ServeError;
use crate::net::{set_inheritable, ListenerKind};

/// Environment variable carrying the inherited descriptor number.
pub const INHERITED_FD_ENV: &str = "SERVER_INHERITED_FD";

/// Environment variable carrying the inherited listener kind.
pub const INHERITED_KIND_ENV: &str = "SERVER_INHERITED_KIND";

/// How often the predecessor re-reads the PID file during the wait.
const READINESS_POLL: Duration = Duration::from_millis(50);

/// A listener identity received from a predecessor process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritedListener {
    pub fd: RawFd,
    pub kind: ListenerKind,
}

/// Reads the handover contract from the environment.
///
/// Returns `Ok(None)` when neither variable is set (fresh start). A
/// half-set or unparseable contract is [`ServeError::InheritFailed`]: the
/// predecessor meant to hand something over and we cannot take it.
pub fn inherited_from_env() -> Result<Option<InheritedListener>, ServeError> {
    let fd = std::env::var(INHERITED_FD_ENV).ok();
    let kind = std::env::var(INHERITED_KIND_ENV).ok();

    match (fd, kind) {
        (None, None) => Ok(None),
        (Some(fd), Some(kind)) => {
            let fd: RawFd = fd.parse().map_err(|_| ServeError::InheritFailed {
                reason: format!("{INHERITED_FD_ENV}='{fd}' is not a descriptor number"),
            })?;
            let kind: ListenerKind = kind.parse().map_err(|e| ServeError::InheritFailed {
                reason: format!("{INHERITED_KIND_ENV}: {e}"),
            })?;
            Ok(Some(InheritedListener { fd, kind }))
        }
        _ => Err(ServeError::InheritFailed {
            reason: format!(
                "{INHERITED_FD_ENV} and {INHERITED_KIND_ENV} must be set together"
            ),
        }),
    }
}

/// Spawns the successor and waits for it to take over.
///
/// Returns the successor's PID once the PID file names a process other
/// than `own_pid`. Fails (with [`ServeError::HandoverFailed`]) when the
/// spawn itself fails, the successor exits before taking over, or the
/// window closes; the caller then reverts to running.
pub(crate) async fn spawn_successor(
    fd: RawFd,
    kind: ListenerKind,
    argv: &[String],
    own_pid: u32,
    pid_path: &Path,
    window: Duration,
) -> Result<u32, ServeError> {
    let handover_failed = |reason: String| ServeError::HandoverFailed { reason };

    let (program, args) = argv
        .split_first()
        .ok_or_else(|| handover_failed("start_command is empty".into()))?;

    // The descriptor crosses the exec only while marked inheritable; the
    // flag is restored as soon as the spawn happened, so unrelated child
    // processes never see it.
    set_inheritable(fd, true)
        .map_err(|e| handover_failed(format!("mark fd {fd} inheritable: {e}")))?;

    let spawned = Command::new(program)
        .args(args)
        .env(INHERITED_FD_ENV, fd.to_string())
        .env(INHERITED_KIND_ENV, kind.as_str())
        .spawn();

    let restore = set_inheritable(fd, false);

    let mut child = spawned.map_err(|e| handover_failed(format!("spawn '{program}': {e}")))?;
    restore.map_err(|e| handover_failed(format!("restore cloexec on fd {fd}: {e}")))?;

    let deadline = tokio::time::Instant::now() + window;
    loop {
        if let Some(pid) = PidFile::read(pid_path) {
            if pid != own_pid {
                return Ok(pid);
            }
        }

        if let Ok(Some(status)) = child.try_wait() {
            return Err(handover_failed(format!(
                "successor exited before takeover ({status})"
            )));
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(handover_failed(format!(
                "successor did not take over within {window:?}"
            )));
        }

        tokio::time::sleep(READINESS_POLL).await;
    }
}
