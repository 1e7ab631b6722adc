//! Application layer: the composition root and its long-lived collaborators.
//!
//! # Sub-modules
//!
//! - **`context`** – [`Application`](context::Application): owns the plugin
//!   registry, the device roster, identity settings, and the collaborators
//!   below.  Its `run()` loop is the single task that mutates them.
//!
//! - **`identity`** – Lazily defaulted device UUID and display name behind
//!   the [`KeyValueStore`](identity::KeyValueStore) seam.
//!
//! - **`transfer_queue`**, **`handler_registry`**, **`action_log`** – The
//!   collaborators.  Each refuses new work after `stop_accepting()`.
//!
//! - **`drive_transfer`** – Tasks that drive one transport each and report
//!   progress back to the loop.
//!
//! Nothing in this layer opens sockets or files directly; those come in
//! through plugins and the `infrastructure` adapters.

use thiserror::Error;

pub mod action_log;
pub mod context;
pub mod drive_transfer;
pub mod handler_registry;
pub mod identity;
pub mod transfer_queue;

/// Raised by a collaborator that no longer accepts work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{0} is no longer accepting work")]
    Stopped(&'static str),
}
