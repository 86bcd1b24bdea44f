//! # TLS acceptor construction for the `tls://` listener variant.
//!
//! [`TlsSettings`] carries the certificate chain path, private key path and
//! the protocol version selection from the bind address. The settings are
//! turned into a reusable [`tokio_rustls::TlsAcceptor`] once, at listener
//! construction time; the acceptor is then cloned per handshake (cheap,
//! Arc-based).
//!
//! Certificate loading failures are configuration errors: the server must
//! not come up with a listener it cannot complete handshakes on.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::ServeError;

/// Protocol versions the TLS listener advertises.
///
/// Clients failing to negotiate one of the advertised versions are
/// rejected during the handshake like any other handshake failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsProtocol {
    /// TLS 1.2 only.
    Tls12,
    /// TLS 1.3 only.
    Tls13,
    /// Offer both and let the client pick (default).
    #[default]
    Negotiate,
}

impl FromStr for TlsProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.2" | "tls1.2" => Ok(TlsProtocol::Tls12),
            "1.3" | "tls1.3" => Ok(TlsProtocol::Tls13),
            other => Err(format!("unknown tls protocol '{other}' (expected 1.2 or 1.3)")),
        }
    }
}

/// Certificate material and protocol selection for a TLS listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM file holding the server certificate chain, leaf first.
    pub cert: PathBuf,
    /// PEM file holding the matching private key.
    pub key: PathBuf,
    /// Advertised protocol version(s).
    pub protocol: TlsProtocol,
}

impl TlsSettings {
    /// Creates settings for the given cert/key pair, negotiating versions.
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            protocol: TlsProtocol::default(),
        }
    }

    /// Loads the certificate material and builds the acceptor.
    ///
    /// Fails with [`ServeError::ConfigurationInvalid`] when the files are
    /// unreadable, empty, or rejected by rustls.
    pub fn acceptor(&self) -> Result<TlsAcceptor, ServeError> {
        let certs = self.load_certs()?;
        let key = self.load_key()?;

        let versions: &[&rustls::SupportedProtocolVersion] = match self.protocol {
            TlsProtocol::Tls12 => &[&rustls::version::TLS12],
            TlsProtocol::Tls13 => &[&rustls::version::TLS13],
            TlsProtocol::Negotiate => rustls::ALL_VERSIONS,
        };

        let config = ServerConfig::builder_with_protocol_versions(versions)
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServeError::ConfigurationInvalid {
                reason: format!("tls certificate rejected: {e}"),
            })?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    fn load_certs(&self) -> Result<Vec<CertificateDer<'static>>, ServeError> {
        let file = File::open(&self.cert).map_err(|e| ServeError::ConfigurationInvalid {
            reason: format!("cannot open tls cert {:?}: {e}", self.cert),
        })?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServeError::ConfigurationInvalid {
                reason: format!("cannot parse tls cert {:?}: {e}", self.cert),
            })?;
        if certs.is_empty() {
            return Err(ServeError::ConfigurationInvalid {
                reason: format!("no certificates found in {:?}", self.cert),
            });
        }
        Ok(certs)
    }

    fn load_key(&self) -> Result<PrivateKeyDer<'static>, ServeError> {
        let file = File::open(&self.key).map_err(|e| ServeError::ConfigurationInvalid {
            reason: format!("cannot open tls key {:?}: {e}", self.key),
        })?;
        rustls_pemfile::private_key(&mut BufReader::new(file))
            .map_err(|e| ServeError::ConfigurationInvalid {
                reason: format!("cannot parse tls key {:?}: {e}", self.key),
            })?
            .ok_or_else(|| ServeError::ConfigurationInvalid {
                reason: format!("no private key found in {:?}", self.key),
            })
    }
}
