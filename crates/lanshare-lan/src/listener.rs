//! Inbound side of the LAN transport.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::tls::TlsConfig;
use crate::transport::LanTransport;

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Accepts TCP connections and hands each one out as an idle acceptor
/// [`LanTransport`] carrying the listener's TLS configuration.
pub struct LanListener {
    listener: TcpListener,
    tls: Option<TlsConfig>,
}

impl LanListener {
    /// Binds to `addr`.  Port 0 picks an ephemeral port; see [`local_addr`].
    ///
    /// [`local_addr`]: LanListener::local_addr
    pub async fn bind(addr: SocketAddr, tls: Option<TlsConfig>) -> Result<Self, ListenError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenError::Bind { addr, source })?;
        info!(
            "LAN listener bound on {} ({})",
            listener.local_addr().unwrap_or(addr),
            if tls.is_some() { "TLS" } else { "plaintext" }
        );
        Ok(Self { listener, tls })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next inbound connection.  The returned transport must
    /// be started by the caller.
    pub async fn accept(&self) -> io::Result<LanTransport> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("accepted connection from {peer}");
        Ok(LanTransport::accepted(self.tls.clone(), stream))
    }
}
