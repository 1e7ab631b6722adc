//! Plugins compiled into the daemon.
//!
//! The LAN transport plugin lives in `lanshare_lan`; the plugins here depend
//! on application configuration.

pub mod static_devices;
