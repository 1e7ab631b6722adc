//! DeviceModel: the ordered, de-duplicated device roster.
//!
//! Presence events arrive asynchronously from one or more enumerator sources.
//! The model merges them into a single list where each device identifier
//! appears at most once, in order of first discovery.
//!
//! # Mutations
//!
//! Every change is one of three row-scoped operations, and each one emits
//! exactly one [`RosterChange`] to every subscriber:
//!
//! ```text
//! presence_update(new id)        ──►  Inserted { row = len }
//! presence_update(known id, Δ≠∅) ──►  Changed  { row }
//! presence_update(known id, Δ=∅) ──►  (nothing)
//! last reporting source gone     ──►  Removed  { row }
//! ```
//!
//! # Reporting sources
//!
//! Each entry remembers which sources currently report it.  A device leaves
//! the roster only when its last reporting source either announces its
//! removal or is itself removed with [`DeviceModel::remove_source`].
//!
//! # Threading
//!
//! The model is plain owned state mutated through `&mut self`.  It lives on
//! the single task that owns the application and never needs a lock.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::device::{Device, PresenceEvent, PresenceFields};

/// Identifies one enumerator source registered with the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// A structural change to the roster, scoped to a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    /// A device was appended at `row`.
    Inserted { row: usize },
    /// The device at `row` changed at least one field.
    Changed { row: usize },
    /// The device previously at `row` was removed; later rows shift up by one.
    Removed { row: usize },
}

#[derive(Debug)]
struct Entry {
    device: Device,
    sources: BTreeSet<SourceId>,
}

/// The device roster.
#[derive(Default)]
pub struct DeviceModel {
    rows: Vec<Entry>,
    index: HashMap<String, usize>,
    sources: HashMap<SourceId, String>,
    next_source: u64,
    observers: Vec<mpsc::UnboundedSender<RosterChange>>,
}

impl DeviceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for every subsequent [`RosterChange`].
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<RosterChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Registers a new enumerator source.  The roster is not changed.
    ///
    /// `label` is used only for log messages.
    pub fn add_source(&mut self, label: impl Into<String>) -> SourceId {
        let id = SourceId(self.next_source);
        self.next_source += 1;
        let label = label.into();
        info!("device source {id} added ({label})");
        self.sources.insert(id, label);
        id
    }

    /// Unregisters `source` and removes every device it was the last to report.
    ///
    /// Devices still reported by another source survive unchanged.  Returns
    /// the number of removed rows.  Unknown sources are a no-op.
    pub fn remove_source(&mut self, source: SourceId) -> usize {
        let Some(label) = self.sources.remove(&source) else {
            debug!("remove_source: {source} is not registered");
            return 0;
        };

        // Walk from the tail so every emitted row index is valid when emitted.
        let mut removed = 0;
        for row in (0..self.rows.len()).rev() {
            let entry = &mut self.rows[row];
            if entry.sources.remove(&source) && entry.sources.is_empty() {
                self.remove_row(row);
                removed += 1;
            }
        }

        info!("device source {source} removed ({label}); {removed} device(s) dropped");
        removed
    }

    /// Returns `true` if `source` is currently registered.
    pub fn has_source(&self, source: SourceId) -> bool {
        self.sources.contains_key(&source)
    }

    /// Applies a presence event reported by `source`.
    pub fn apply(&mut self, source: SourceId, event: PresenceEvent) {
        match event {
            PresenceEvent::Updated { id, fields } => self.presence_update(source, &id, &fields),
            PresenceEvent::Removed { id } => self.presence_removed(source, &id),
        }
    }

    /// Inserts a new device or merges `fields` into the existing one.
    ///
    /// A merge that changes nothing emits nothing.  Events from a source that
    /// is not registered are ignored.
    pub fn presence_update(&mut self, source: SourceId, id: &str, fields: &PresenceFields) {
        if !self.has_source(source) {
            debug!("dropping update for {id} from unregistered {source}");
            return;
        }

        match self.index.get(id).copied() {
            Some(row) => {
                let entry = &mut self.rows[row];
                entry.sources.insert(source);
                if entry.device.merge(fields) {
                    debug!("device {id} updated at row {row}");
                    self.emit(RosterChange::Changed { row });
                }
            }
            None => {
                let row = self.rows.len();
                let device = Device::from_presence(id, fields);
                info!("device discovered: {} ({id})", device.name);
                self.rows.push(Entry {
                    device,
                    sources: BTreeSet::from([source]),
                });
                self.index.insert(id.to_string(), row);
                self.emit(RosterChange::Inserted { row });
            }
        }
    }

    /// Records that `source` no longer sees `id`.
    ///
    /// The device is removed once no source reports it.  Unknown identifiers
    /// and identifiers this source never reported are a no-op.
    pub fn presence_removed(&mut self, source: SourceId, id: &str) {
        if !self.has_source(source) {
            debug!("dropping removal of {id} from unregistered {source}");
            return;
        }

        let Some(row) = self.index.get(id).copied() else {
            debug!("removal of unknown device {id} ignored");
            return;
        };

        let entry = &mut self.rows[row];
        if !entry.sources.remove(&source) {
            debug!("{source} never reported {id}; removal ignored");
            return;
        }
        if entry.sources.is_empty() {
            self.remove_row(row);
        }
    }

    /// Number of devices in the roster.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the device at `row`.
    pub fn device_at(&self, row: usize) -> Option<&Device> {
        self.rows.get(row).map(|e| &e.device)
    }

    /// Returns the device with identifier `id`.
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.row_of(id).map(|row| &self.rows[row].device)
    }

    /// Returns the current row of `id`.
    pub fn row_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Iterates devices in roster order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.rows.iter().map(|e| &e.device)
    }

    fn remove_row(&mut self, row: usize) {
        let entry = self.rows.remove(row);
        self.index.remove(&entry.device.id);
        for (offset, later) in self.rows[row..].iter().enumerate() {
            self.index.insert(later.device.id.clone(), row + offset);
        }
        info!("device removed: {} ({})", entry.device.name, entry.device.id);
        self.emit(RosterChange::Removed { row });
    }

    fn emit(&mut self, change: RosterChange) {
        self.observers.retain(|tx| tx.send(change).is_ok());
    }
}

impl fmt::Debug for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceModel")
            .field("devices", &self.rows.len())
            .field("sources", &self.sources.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
