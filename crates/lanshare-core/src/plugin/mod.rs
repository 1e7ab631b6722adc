//! Plugins and the capabilities they contribute.
//!
//! # Sub-modules
//!
//! - **`registry`** – Loads [`registry::Plugin`]s, keeps their capabilities
//!   keyed by name, and revokes them atomically on unload.
//!
//! - **`enumerator`** – The device-discovery capability and the
//!   [`enumerator::PresenceSink`] an enumerator pushes presence events into.
//!
//! - **`handler`** – The payload-handler capability.  Concrete handlers are
//!   supplied by content plugins and are opaque to this crate.
//!
//! The transport capability is defined in [`crate::transport`].

pub mod enumerator;
pub mod handler;
pub mod registry;
