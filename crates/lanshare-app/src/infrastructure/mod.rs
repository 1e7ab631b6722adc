//! Infrastructure layer: adapters to the file system and built-in plugins.
//!
//! The application layer reaches this layer only through the
//! [`KeyValueStore`](crate::application::identity::KeyValueStore) trait, the
//! plain config types, and the `Plugin` trait.

pub mod plugins;
pub mod storage;
