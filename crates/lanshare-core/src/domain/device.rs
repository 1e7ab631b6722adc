//! Devices and presence announcements.
//!
//! An enumerator describes a device with a [`PresenceFields`] value: a small
//! tagged structure with the two fields the roster understands (`name` and
//! `addresses`) plus an `extra` map that carries anything else untouched.
//!
//! Presence input is best-effort.  Nothing in this module fails on malformed
//! input; unusable values are dropped and the rest of the announcement is kept.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Field name for the human-readable device name.
pub const FIELD_NAME: &str = "name";
/// Field name for the set of network addresses.
pub const FIELD_ADDRESSES: &str = "addresses";

/// A device in the roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable opaque identifier chosen by the enumerator that found the device.
    pub id: String,
    /// Display name.  Empty until an enumerator reports one.
    pub name: String,
    /// Network addresses, de-duplicated.
    pub addresses: BTreeSet<String>,
    /// Fields the roster does not interpret, kept for forward compatibility.
    pub extra: BTreeMap<String, Value>,
}

impl Device {
    /// Creates a device from its first announcement.  Unspecified fields are empty.
    pub fn from_presence(id: impl Into<String>, fields: &PresenceFields) -> Self {
        let mut device = Self {
            id: id.into(),
            ..Self::default()
        };
        device.merge(fields);
        device
    }

    /// Applies the fields present in `fields` and reports whether anything changed.
    ///
    /// Fields absent from the announcement keep their stored values.
    pub fn merge(&mut self, fields: &PresenceFields) -> bool {
        let mut changed = false;

        if let Some(name) = &fields.name {
            if *name != self.name {
                self.name = name.clone();
                changed = true;
            }
        }

        if let Some(addresses) = &fields.addresses {
            if *addresses != self.addresses {
                self.addresses = addresses.clone();
                changed = true;
            }
        }

        for (key, value) in &fields.extra {
            if self.extra.get(key) != Some(value) {
                self.extra.insert(key.clone(), value.clone());
                changed = true;
            }
        }

        changed
    }

    /// Returns the addresses that parse as IP addresses, in set order.
    pub fn ip_addresses(&self) -> Vec<IpAddr> {
        self.addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect()
    }
}

/// The fields carried by one presence announcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<BTreeSet<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PresenceFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = Some(addresses.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Builds fields from a dynamic map as produced by a discovery protocol.
    ///
    /// `name` must be a string and `addresses` an array of strings (non-string
    /// elements are skipped).  A recognised field of the wrong type is dropped.
    /// Every other key lands in `extra`.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut fields = Self::default();
        for (key, value) in map {
            match key.as_str() {
                FIELD_NAME => match value {
                    Value::String(name) => fields.name = Some(name),
                    other => debug!("ignoring non-string device name: {other}"),
                },
                FIELD_ADDRESSES => match value {
                    Value::Array(items) => {
                        fields.addresses = Some(
                            items
                                .into_iter()
                                .filter_map(|v| match v {
                                    Value::String(s) => Some(s),
                                    _ => None,
                                })
                                .collect(),
                        );
                    }
                    other => debug!("ignoring malformed address list: {other}"),
                },
                _ => {
                    fields.extra.insert(key, value);
                }
            }
        }
        fields
    }

    /// Returns `true` when the announcement carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.addresses.is_none() && self.extra.is_empty()
    }
}

/// A single presence event produced by an enumerator.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// The device was seen, possibly with new field values.
    Updated { id: String, fields: PresenceFields },
    /// The device is no longer visible to this enumerator.
    Removed { id: String },
}

impl PresenceEvent {
    /// The device identifier the event refers to.
    pub fn device_id(&self) -> &str {
        match self {
            PresenceEvent::Updated { id, .. } | PresenceEvent::Removed { id } => id,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
