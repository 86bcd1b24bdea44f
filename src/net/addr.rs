//! # Bind addresses.
//!
//! A bind address selects one of three concrete listener bindings. In
//! textual form it is a URL whose scheme picks the binding:
//!
//! - `tcp://127.0.0.1:6789` (IPv4/IPv6 TCP)
//! - `unix:///tmp/echo_server.sock` (Unix stream socket)
//! - `tls://127.0.0.1:6789?cert=/etc/srv/cert.pem&key=/etc/srv/key.pem`
//!   (TLS over TCP; `cert` and `key` are required, `protocol` optionally
//!   pins `1.2` or `1.3`)
//!
//! The scheme kind also names the listener in the handover environment
//! contract, so [`ListenerKind`] round-trips through its string form.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::ServeError;
use crate::net::tls::TlsSettings;

/// The binding family of a listener, as carried in the handover contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    Tcp,
    Unix,
    Tls,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Tcp => "tcp",
            ListenerKind::Unix => "unix",
            ListenerKind::Tls => "tls",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(ListenerKind::Tcp),
            "unix" => Ok(ListenerKind::Unix),
            "tls" => Ok(ListenerKind::Tls),
            other => Err(format!("unknown listener kind '{other}'")),
        }
    }
}

/// A parsed bind address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindAddress {
    /// A TCP listen address.
    Tcp(SocketAddr),

    /// A Unix stream socket path.
    Unix(PathBuf),

    /// A TLS-wrapped TCP listen address with certificate material.
    Tls(SocketAddr, TlsSettings),
}

impl BindAddress {
    /// The binding family, used for the inherit-handover kind check.
    pub fn kind(&self) -> ListenerKind {
        match self {
            BindAddress::Tcp(_) => ListenerKind::Tcp,
            BindAddress::Unix(_) => ListenerKind::Unix,
            BindAddress::Tls(..) => ListenerKind::Tls,
        }
    }

    /// The socket address for the TCP-backed variants.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            BindAddress::Tcp(addr) | BindAddress::Tls(addr, _) => Some(*addr),
            BindAddress::Unix(_) => None,
        }
    }

    /// The socket path for the Unix variant.
    pub fn unix_path(&self) -> Option<&PathBuf> {
        match self {
            BindAddress::Unix(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAddress::Tcp(addr) => write!(f, "tcp://{addr}"),
            BindAddress::Unix(path) => write!(f, "unix://{}", path.display()),
            BindAddress::Tls(addr, _) => write!(f, "tls://{addr}"),
        }
    }
}

impl FromStr for BindAddress {
    type Err = ServeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ServeError::ConfigurationInvalid { reason };

        let url = Url::parse(value)
            .map_err(|e| invalid(format!("bind address '{value}': {e}")))?;

        match url.scheme() {
            "tcp" => Ok(BindAddress::Tcp(resolve_addr(&url)?)),
            "tls" => {
                let addr = resolve_addr(&url)?;
                let settings = tls_settings_from_query(&url)?;
                Ok(BindAddress::Tls(addr, settings))
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(invalid("unix socket path cannot be empty".into()));
                }
                let path = PathBuf::from(path);
                if !path.is_absolute() {
                    return Err(invalid("unix socket path must be absolute".into()));
                }
                Ok(BindAddress::Unix(path))
            }
            scheme => Err(invalid(format!(
                "unknown bind scheme '{scheme}' (expected tcp, unix or tls)"
            ))),
        }
    }
}

fn resolve_addr(url: &Url) -> Result<SocketAddr, ServeError> {
    let mut addrs = url
        .socket_addrs(|| None)
        .map_err(|e| ServeError::ConfigurationInvalid {
            reason: format!("bind address '{url}': {e}"),
        })?;
    if addrs.is_empty() {
        return Err(ServeError::ConfigurationInvalid {
            reason: format!("bind address '{url}' resolves to no usable address"),
        });
    }
    Ok(addrs.swap_remove(0))
}

fn tls_settings_from_query(url: &Url) -> Result<TlsSettings, ServeError> {
    let mut cert = None;
    let mut key = None;
    let mut protocol = None;

    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "cert" => cert = Some(PathBuf::from(value.as_ref())),
            "key" => key = Some(PathBuf::from(value.as_ref())),
            "protocol" => {
                protocol = Some(value.parse().map_err(|e| {
                    ServeError::ConfigurationInvalid { reason: e }
                })?)
            }
            other => {
                return Err(ServeError::ConfigurationInvalid {
                    reason: format!("unknown tls bind parameter '{other}'"),
                })
            }
        }
    }

    let (cert, key) = match (cert, key) {
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(ServeError::ConfigurationInvalid {
                reason: "tls bind requires both cert= and key= parameters".into(),
            })
        }
    };

    let mut settings = TlsSettings::new(cert, key);
    if let Some(p) = protocol {
        settings.protocol = p;
    }
    Ok(settings)
}
