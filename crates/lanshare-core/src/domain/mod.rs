//! Domain entities for LanShare.
//!
//! Pure roster logic with no infrastructure dependencies.  Presence events
//! come in, single-row change notifications go out.

/// Devices and the presence announcements that describe them.
pub mod device;

/// The ordered device roster.
///
/// See [`roster::DeviceModel`] for the main type.
pub mod roster;
