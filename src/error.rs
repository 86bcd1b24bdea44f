//! # Error types used by the connvisor runtime and connection workers.
//!
//! This module defines two main error enums:
//!
//! - [`ServeError`] errors raised by the server runtime itself. These are
//!   fatal: the process is expected to exit non-zero when one surfaces
//!   from [`Supervisor::run`](crate::Supervisor::run).
//! - [`ConnError`] errors scoped to a single connection. These never cross
//!   connection boundaries; the worker logs them and deregisters.
//!
//! Both types provide an `as_label` helper producing a short stable
//! snake_case string for logs and metrics.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the server runtime.
///
/// Raised during startup (bind, inherit, configuration, PID file) or by the
/// supervisor itself. Any of these aborts the server; per-connection
/// failures are [`ConnError`] instead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServeError {
    /// Binding the listen address failed (address in use, permissions).
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Textual form of the configured bind address.
        addr: String,
        source: io::Error,
    },

    /// An inherited listener handle could not be adopted.
    ///
    /// Raised when the handed-over descriptor is invalid, or when the
    /// kind advertised by the predecessor disagrees with the configured
    /// bind scheme.
    #[error("failed to inherit listener: {reason}")]
    InheritFailed { reason: String },

    /// The configuration cannot describe a runnable server.
    #[error("invalid configuration: {reason}")]
    ConfigurationInvalid { reason: String },

    /// The PID file could not be written or replaced.
    #[error("pid file {path:?}: {source}")]
    PidFile { path: PathBuf, source: io::Error },

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {source}")]
    SignalSetup { source: io::Error },

    /// The restart successor did not take over within the bounded window.
    ///
    /// The supervisor recovers from this (it reverts to running and
    /// rewrites the PID file); the variant exists so the handover path can
    /// report why through one channel.
    #[error("restart handover failed: {reason}")]
    HandoverFailed { reason: String },
}

impl ServeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServeError::BindFailed { .. } => "serve_bind_failed",
            ServeError::InheritFailed { .. } => "serve_inherit_failed",
            ServeError::ConfigurationInvalid { .. } => "serve_configuration_invalid",
            ServeError::PidFile { .. } => "serve_pid_file",
            ServeError::SignalSetup { .. } => "serve_signal_setup",
            ServeError::HandoverFailed { .. } => "serve_handover_failed",
        }
    }

    /// True when the error is fatal at startup (exit non-zero, no PID file
    /// left behind). [`ServeError::HandoverFailed`] is the only variant the
    /// supervisor recovers from.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ServeError::HandoverFailed { .. })
    }
}

/// # Errors scoped to one connection.
///
/// The dispatch worker logs these and moves on; other connections and the
/// supervisor state are unaffected.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConnError {
    /// TLS handshake did not complete; the raw stream was closed.
    #[error("tls handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    /// Remote address is outside the configured allow-list.
    #[error("remote {peer} not in allowed networks")]
    RemoteDenied { peer: String },

    /// The application handler returned an error.
    #[error("handler failed: {reason}")]
    HandlerFailed { reason: String },
}

impl ConnError {
    /// Shorthand for a handler failure with a formatted reason.
    pub fn handler(reason: impl Into<String>) -> Self {
        ConnError::HandlerFailed {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnError::HandshakeFailed { .. } => "conn_handshake_failed",
            ConnError::RemoteDenied { .. } => "conn_remote_denied",
            ConnError::HandlerFailed { .. } => "conn_handler_failed",
        }
    }
}

impl From<io::Error> for ConnError {
    fn from(e: io::Error) -> Self {
        ConnError::HandlerFailed {
            reason: e.to_string(),
        }
    }
}
