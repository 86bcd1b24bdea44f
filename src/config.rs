//! # Server configuration.
//!
//! [`ServerConfig`] defines one server instance: where it listens, where
//! its PID file lives, who may connect, how long draining and handover may
//! take, and what argv the restart successor is spawned with.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use connvisor::ServerConfig;
//!
//! let mut cfg = ServerConfig::new("tcp://127.0.0.1:6789".parse().unwrap());
//! cfg.drain_timeout = Some(Duration::from_secs(30));
//! cfg.pid_path = "/run/echo_server.pid".into();
//!
//! assert!(cfg.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ServeError;
use crate::net::{AllowList, BindAddress};
use crate::subscribers::LogLevel;

/// Configuration for one server instance.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// The listen binding (`tcp://`, `unix://` or `tls://`).
    pub bind: BindAddress,
    /// Where the owning process records its PID.
    pub pid_path: PathBuf,
    /// Ordered CIDR allow-list; empty allows every remote.
    pub allowed_networks: AllowList,
    /// Optional deadline for the drain phase (`None` = unbounded).
    pub drain_timeout: Option<Duration>,
    /// Bounded wait for a restart successor to take over.
    pub handover_timeout: Duration,
    /// Bounded wait for a TLS handshake to complete.
    pub handshake_timeout: Duration,
    /// Argv used to exec the restart successor. Defaults to this
    /// process's own command line.
    pub start_command: Vec<String>,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
    /// Threshold for the built-in log subscriber.
    pub log_level: LogLevel,
}

impl ServerConfig {
    /// Creates a configuration for the given binding with defaults for
    /// everything else:
    /// - `pid_path = ./<program>.pid`
    /// - `allowed_networks` empty (allow all)
    /// - `drain_timeout = None` (unbounded)
    /// - `handover_timeout = 5s`
    /// - `handshake_timeout = 10s`
    /// - `start_command` = this process's argv
    /// - `bus_capacity = 1024`
    /// - `log_level = info`
    pub fn new(bind: BindAddress) -> Self {
        Self {
            bind,
            pid_path: default_pid_path(),
            allowed_networks: AllowList::allow_all(),
            drain_timeout: None,
            handover_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            start_command: std::env::args().collect(),
            bus_capacity: 1024,
            log_level: LogLevel::default(),
        }
    }

    /// Checks the invariants that only the combination of fields can
    /// violate; per-field parsing errors surface earlier.
    pub fn validate(&self) -> Result<(), ServeError> {
        if self.bus_capacity == 0 {
            return Err(ServeError::ConfigurationInvalid {
                reason: "bus_capacity must be at least 1".into(),
            });
        }
        if self.start_command.is_empty() {
            return Err(ServeError::ConfigurationInvalid {
                reason: "start_command must name a program to exec on restart".into(),
            });
        }
        if self.handover_timeout.is_zero() {
            return Err(ServeError::ConfigurationInvalid {
                reason: "handover_timeout must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// `./<program>.pid`, falling back to the crate name when the executable
/// name is unavailable.
fn default_pid_path() -> PathBuf {
    let program = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "connvisor".to_string());
    PathBuf::from(format!("./{program}.pid"))
}
