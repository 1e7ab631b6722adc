//! # lanshare-core
//!
//! Shared library for LanShare containing the device roster, the plugin
//! registry, and the capability contracts that plugins implement.
//!
//! This crate has no dependencies on sockets, the file system, or UI
//! frameworks.  Concrete transports live in `lanshare-lan`; the composition
//! root that wires everything together lives in `lanshare-app`.
//!
//! # Architecture overview
//!
//! LanShare is a peer-to-peer file-sharing service for local networks.  Three
//! pieces carry most of the weight:
//!
//! - **`domain`** – The [`DeviceModel`]: an ordered, de-duplicated roster of
//!   devices built from presence announcements that arrive from one or more
//!   discovery sources.  Every mutation emits a single-row [`RosterChange`].
//!
//! - **`plugin`** – The [`PluginRegistry`] and the capability interfaces a
//!   plugin can contribute: device enumerators, transports, and payload
//!   handlers.  The registry routes by capability name and never looks inside
//!   a capability.
//!
//! - **`transport`** – The [`Transport`] trait: a non-blocking, event-driven
//!   byte channel with an explicit state machine.

pub mod domain;
pub mod plugin;
pub mod transport;

pub use domain::device::{Device, PresenceEvent, PresenceFields};
pub use domain::roster::{DeviceModel, RosterChange, SourceId};
pub use plugin::enumerator::{DeviceEnumerator, PresenceSink, SourceEvent};
pub use plugin::handler::{HandlerFactory, PayloadHandler};
pub use plugin::registry::{
    Capability, CapabilityKind, LoadError, Plugin, PluginContext, PluginHandle, PluginMetadata,
    PluginRegistry, RegistryError, RegistryEvent,
};
pub use transport::{
    PeerAddress, Role, Transport, TransportError, TransportEvent, TransportFactory,
    TransportState,
};
