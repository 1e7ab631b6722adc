//! # lanshare-lan
//!
//! Local-network transport for LanShare: plain TCP connections with an
//! optional TLS upgrade, plus the plugin that exposes it to the registry as
//! the `transport/lan` capability.
//!
//! # Modules
//!
//! - **`transport`** – [`LanTransport`], the connection state machine.  One
//!   spawned Tokio task drives the socket; the owning handle receives events
//!   in order through [`Transport::next_event`](lanshare_core::Transport::next_event).
//!
//! - **`tls`** – [`TlsConfig`]: rustls client/server configuration and PEM
//!   loading.  Absence of a `TlsConfig` means plaintext.
//!
//! - **`listener`** – [`LanListener`], which accepts inbound connections and
//!   wraps each one in an acceptor-role `LanTransport`.
//!
//! - **`plugin`** – [`LanPlugin`], the registry entry point.

pub mod listener;
pub mod plugin;
pub mod tls;
pub mod transport;

pub use listener::{LanListener, ListenError};
pub use plugin::{LanPlugin, CAPABILITY_TRANSPORT_LAN, DEFAULT_PORT};
pub use tls::{TlsConfig, TlsFiles, TlsSetupError};
pub use transport::{LanTransport, LanTransportFactory};
