//! Device enumerator capability.
//!
//! An enumerator is a discovery mechanism.  When the application activates
//! one it registers a source with the [`DeviceModel`](crate::DeviceModel),
//! hands the enumerator a [`PresenceSink`] tagged with that source, and calls
//! [`DeviceEnumerator::start`].  The enumerator pushes presence events into
//! the sink from whatever thread or task it runs on; the application's event
//! loop drains the channel and applies each event to the roster in order.

use tokio::sync::mpsc;

use crate::domain::device::{PresenceEvent, PresenceFields};
use crate::domain::roster::SourceId;

/// A presence event tagged with the source that produced it.
pub type SourceEvent = (SourceId, PresenceEvent);

/// Cloneable handle an enumerator uses to report presence changes.
#[derive(Debug, Clone)]
pub struct PresenceSink {
    source: SourceId,
    tx: mpsc::UnboundedSender<SourceEvent>,
}

impl PresenceSink {
    pub fn new(source: SourceId, tx: mpsc::UnboundedSender<SourceEvent>) -> Self {
        Self { source, tx }
    }

    /// The roster source this sink reports as.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Reports that `id` is present with `fields`.
    ///
    /// Returns `false` once the event loop has gone away.
    pub fn update(&self, id: impl Into<String>, fields: PresenceFields) -> bool {
        self.send(PresenceEvent::Updated {
            id: id.into(),
            fields,
        })
    }

    /// Reports that `id` is no longer visible.
    pub fn remove(&self, id: impl Into<String>) -> bool {
        self.send(PresenceEvent::Removed { id: id.into() })
    }

    pub fn send(&self, event: PresenceEvent) -> bool {
        self.tx.send((self.source, event)).is_ok()
    }
}

/// A source of device presence events.
pub trait DeviceEnumerator: Send {
    /// Begins reporting into `sink`.  Must not block.
    fn start(&mut self, sink: PresenceSink);

    /// Stops reporting.  Devices this enumerator reported are removed by the
    /// roster when its source is removed, so no removal events are required.
    fn stop(&mut self);
}
