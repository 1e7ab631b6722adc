//! TLS configuration for LAN transports.
//!
//! A [`TlsConfig`] carries the rustls client configuration (used when this
//! device initiates a connection), the server configuration (used when it
//! accepts one), and an optional server name to verify the peer against.
//! Either side may be absent; a transport whose role needs the missing side
//! fails its handshake with a TLS error instead of falling back to plaintext.
//!
//! Certificates and keys are loaded from PEM files:
//!
//! ```toml
//! [lan.tls]
//! certificate = "/etc/lanshare/device.pem"
//! private_key = "/etc/lanshare/device.key"
//! trust_anchors = "/etc/lanshare/ca.pem"
//! server_name = "lanshare.local"   # optional; defaults to the peer IP
//! ```

use std::fs::File;
use std::io::{self, BufReader};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

/// Errors raised while building a [`TlsConfig`].
#[derive(Debug, Error)]
pub enum TlsSetupError {
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The certificate or trust-anchor file held no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    /// The key file held no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// The configured server name is not a valid DNS name or IP address.
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    /// rustls rejected the certificates, key, or protocol settings.
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Paths to the PEM material a [`TlsConfig`] is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// This device's certificate chain.
    pub certificate: PathBuf,
    /// The private key for `certificate`.
    pub private_key: PathBuf,
    /// Certificates trusted when verifying a peer.
    pub trust_anchors: PathBuf,
    /// Name the peer certificate must match.  Defaults to the peer IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

/// Certificate and verification policy for a LAN transport.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    client: Option<Arc<ClientConfig>>,
    server: Option<Arc<ServerConfig>>,
    server_name: Option<ServerName<'static>>,
}

impl TlsConfig {
    /// An empty configuration; add sides with the `with_*` methods.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.client = Some(config);
        self
    }

    pub fn with_server_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.server = Some(config);
        self
    }

    /// Verifies outbound peers against `name` instead of their IP address.
    ///
    /// # Errors
    ///
    /// Returns [`TlsSetupError::InvalidServerName`] if `name` is not a valid
    /// DNS name or IP address.
    pub fn with_server_name(mut self, name: &str) -> Result<Self, TlsSetupError> {
        let parsed = ServerName::try_from(name.to_string())
            .map_err(|_| TlsSetupError::InvalidServerName(name.to_string()))?;
        self.server_name = Some(parsed);
        Ok(self)
    }

    /// Builds the initiating side, trusting only `anchors`.
    ///
    /// # Errors
    ///
    /// Returns [`TlsSetupError::Rustls`] if an anchor is not a usable
    /// certificate.
    pub fn trusting(anchors: Vec<CertificateDer<'static>>) -> Result<Self, TlsSetupError> {
        Ok(Self::new().with_client_config(Arc::new(client_config(anchors)?)))
    }

    /// Builds the accepting side, presenting `chain` signed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TlsSetupError::Rustls`] if the key does not match the chain.
    pub fn serving(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsSetupError> {
        Ok(Self::new().with_server_config(Arc::new(server_config(chain, key)?)))
    }

    /// Loads both sides from PEM files.
    ///
    /// # Errors
    ///
    /// Returns a [`TlsSetupError`] if a file is unreadable, empty, or
    /// rejected by rustls.
    pub fn from_files(files: &TlsFiles) -> Result<Self, TlsSetupError> {
        let chain = load_certs(&files.certificate)?;
        let key = load_key(&files.private_key)?;
        let anchors = load_certs(&files.trust_anchors)?;
        debug!(
            "loaded TLS material: {} certificate(s), {} trust anchor(s)",
            chain.len(),
            anchors.len()
        );

        let mut config = Self::new()
            .with_client_config(Arc::new(client_config(anchors)?))
            .with_server_config(Arc::new(server_config(chain, key)?));
        if let Some(name) = &files.server_name {
            config = config.with_server_name(name)?;
        }
        Ok(config)
    }

    pub fn connector(&self) -> Option<TlsConnector> {
        self.client.clone().map(TlsConnector::from)
    }

    pub fn acceptor(&self) -> Option<TlsAcceptor> {
        self.server.clone().map(TlsAcceptor::from)
    }

    /// The name an outbound connection to `peer` is verified against.
    pub fn server_name_for(&self, peer: IpAddr) -> ServerName<'static> {
        self.server_name
            .clone()
            .unwrap_or_else(|| ServerName::IpAddress(peer.into()))
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn client_config(anchors: Vec<CertificateDer<'static>>) -> Result<ClientConfig, TlsSetupError> {
    let mut roots = RootCertStore::empty();
    for anchor in anchors {
        roots.add(anchor)?;
    }
    Ok(ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, TlsSetupError> {
    Ok(ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsSetupError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsSetupError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsSetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsSetupError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsSetupError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsSetupError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsSetupError::NoPrivateKey(path.to_path_buf()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use std::io::Write;

    fn self_signed() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("rcgen")
    }

    fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_trusting_builds_client_side_only() {
        let cert = self_signed();

        let config = TlsConfig::trusting(vec![cert.cert.der().clone()]).unwrap();

        assert!(config.connector().is_some());
        assert!(config.acceptor().is_none());
    }

    #[test]
    fn test_serving_builds_server_side_only() {
        let cert = self_signed();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

        let config = TlsConfig::serving(vec![cert.cert.der().clone()], key).unwrap();

        assert!(config.acceptor().is_some());
        assert!(config.connector().is_none());
    }

    #[test]
    fn test_server_name_defaults_to_peer_ip() {
        let config = TlsConfig::new();
        let ip: IpAddr = "192.168.1.7".parse().unwrap();

        assert_eq!(
            config.server_name_for(ip),
            ServerName::IpAddress(ip.into())
        );
    }

    #[test]
    fn test_with_server_name_overrides_peer_ip() {
        let config = TlsConfig::new().with_server_name("localhost").unwrap();

        let name = config.server_name_for("10.0.0.1".parse().unwrap());

        assert_eq!(name.to_str(), "localhost");
    }

    #[test]
    fn test_with_server_name_rejects_garbage() {
        let result = TlsConfig::new().with_server_name("not a host name!");

        assert!(matches!(result, Err(TlsSetupError::InvalidServerName(_))));
    }

    #[test]
    fn test_from_files_loads_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed();
        let files = TlsFiles {
            certificate: write_temp(&dir, "device.pem", &cert.cert.pem()),
            private_key: write_temp(&dir, "device.key", &cert.key_pair.serialize_pem()),
            trust_anchors: write_temp(&dir, "ca.pem", &cert.cert.pem()),
            server_name: Some("localhost".to_string()),
        };

        let config = TlsConfig::from_files(&files).unwrap();

        assert!(config.connector().is_some());
        assert!(config.acceptor().is_some());
    }

    #[test]
    fn test_from_files_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = TlsFiles {
            certificate: dir.path().join("missing.pem"),
            private_key: dir.path().join("missing.key"),
            trust_anchors: dir.path().join("missing-ca.pem"),
            server_name: None,
        };

        let result = TlsConfig::from_files(&files);

        assert!(matches!(result, Err(TlsSetupError::Io { .. })));
    }

    #[test]
    fn test_from_files_reports_empty_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed();
        let files = TlsFiles {
            certificate: write_temp(&dir, "empty.pem", ""),
            private_key: write_temp(&dir, "device.key", &cert.key_pair.serialize_pem()),
            trust_anchors: write_temp(&dir, "ca.pem", &cert.cert.pem()),
            server_name: None,
        };

        let result = TlsConfig::from_files(&files);

        assert!(matches!(result, Err(TlsSetupError::NoCertificates(_))));
    }

    #[test]
    fn test_from_files_reports_missing_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed();
        let files = TlsFiles {
            certificate: write_temp(&dir, "device.pem", &cert.cert.pem()),
            private_key: write_temp(&dir, "device.key", &cert.cert.pem()),
            trust_anchors: write_temp(&dir, "ca.pem", &cert.cert.pem()),
            server_name: None,
        };

        let result = TlsConfig::from_files(&files);

        assert!(matches!(result, Err(TlsSetupError::NoPrivateKey(_))));
    }
}
