//! Storage infrastructure: configuration and settings persistence.
//!
//! - `config` reads and writes `config.toml`.
//! - `settings_store` implements the identity [`KeyValueStore`] on top of
//!   `settings.toml`, plus an in-memory variant.
//!
//! [`KeyValueStore`]: crate::application::identity::KeyValueStore

pub mod config;
pub mod settings_store;
