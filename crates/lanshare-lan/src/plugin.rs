//! Registry entry point for the LAN transport.

use std::sync::Arc;

use lanshare_core::{Capability, LoadError, Plugin, PluginContext, PluginMetadata};
use tracing::debug;

use crate::tls::{TlsConfig, TlsFiles};
use crate::transport::LanTransportFactory;

/// Capability name under which the LAN transport factory is registered.
pub const CAPABILITY_TRANSPORT_LAN: &str = "transport/lan";

/// TCP port LanShare devices listen on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 40818;

const SOURCE: &str = "builtin:lan";

#[derive(Debug, Clone, Default)]
enum TlsSource {
    #[default]
    Plaintext,
    Files(TlsFiles),
    Ready(TlsConfig),
}

/// Built-in plugin that provides `transport/lan`.
#[derive(Debug, Clone, Default)]
pub struct LanPlugin {
    tls: TlsSource,
}

impl LanPlugin {
    /// Plaintext transports.
    pub fn new() -> Self {
        Self::default()
    }

    /// TLS material loaded from PEM files when the plugin is loaded.  A bad
    /// file fails the load.
    pub fn with_tls_files(files: TlsFiles) -> Self {
        Self {
            tls: TlsSource::Files(files),
        }
    }

    pub fn with_tls(config: TlsConfig) -> Self {
        Self {
            tls: TlsSource::Ready(config),
        }
    }

    fn tls_config(&self) -> Result<Option<TlsConfig>, LoadError> {
        match &self.tls {
            TlsSource::Plaintext => Ok(None),
            TlsSource::Ready(config) => Ok(Some(config.clone())),
            TlsSource::Files(files) => TlsConfig::from_files(files)
                .map(Some)
                .map_err(|e| LoadError::Capability {
                    plugin: self.metadata().name,
                    reason: e.to_string(),
                }),
        }
    }
}

impl Plugin for LanPlugin {
    fn source(&self) -> &str {
        SOURCE
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("lan", env!("CARGO_PKG_VERSION"))
    }

    fn capabilities(&self, ctx: &PluginContext) -> Result<Vec<(String, Capability)>, LoadError> {
        let tls = self.tls_config()?;
        debug!(
            "building LAN transport for device {} ({})",
            ctx.device_uuid,
            if tls.is_some() { "TLS" } else { "plaintext" }
        );
        let factory = LanTransportFactory::new(tls);
        Ok(vec![(
            CAPABILITY_TRANSPORT_LAN.to_string(),
            Capability::Transport(Arc::new(factory)),
        )])
    }
}
