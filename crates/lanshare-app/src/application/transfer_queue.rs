//! Bookkeeping for transfers in flight and finished.
//!
//! The queue holds one [`Transfer`] record per logical transfer.  Records are
//! created by the application when a transport is handed out and updated from
//! [`TransferUpdate`]s that the transport driver tasks send back to the event
//! loop.  The queue never touches sockets itself.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use super::CollaboratorError;

/// Finished records kept before the oldest is discarded.
pub const DEFAULT_RETAINED: usize = 100;

/// Identifier of a transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Recorded, transport not yet connected.
    Queued,
    /// The transport is connected and moving bytes.
    Active,
    Completed,
    /// The transport failed; the reason is user-visible.
    Failed(String),
}

impl TransferStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed(_))
    }
}

/// One transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: TransferId,
    /// Roster id for outbound transfers, peer address for inbound ones.
    pub peer: String,
    pub direction: Direction,
    pub status: TransferStatus,
    /// Bytes moved so far.
    pub bytes: u64,
    /// Expected size, when known up front.
    pub total: Option<u64>,
}

/// Progress reported by a transport driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferUpdate {
    Started(TransferId),
    Progress { id: TransferId, bytes: u64 },
    Completed { id: TransferId, bytes: u64 },
    Failed { id: TransferId, reason: String },
}

impl TransferUpdate {
    pub fn id(&self) -> TransferId {
        match self {
            TransferUpdate::Started(id)
            | TransferUpdate::Progress { id, .. }
            | TransferUpdate::Completed { id, .. }
            | TransferUpdate::Failed { id, .. } => *id,
        }
    }
}

#[derive(Debug)]
pub struct TransferQueue {
    transfers: BTreeMap<TransferId, Transfer>,
    next_id: u64,
    /// Upper bound on finished records; unfinished ones are never evicted.
    retained: usize,
    accepting: bool,
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED)
    }
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retained: usize) -> Self {
        Self {
            transfers: BTreeMap::new(),
            next_id: 0,
            retained: retained.max(1),
            accepting: true,
        }
    }

    /// Records a new transfer in the `Queued` state.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::Stopped`] after [`stop_accepting`](Self::stop_accepting).
    pub fn enqueue(
        &mut self,
        peer: impl Into<String>,
        direction: Direction,
        total: Option<u64>,
    ) -> Result<TransferId, CollaboratorError> {
        if !self.accepting {
            return Err(CollaboratorError::Stopped("transfer queue"));
        }
        let id = TransferId(self.next_id);
        self.next_id += 1;
        let transfer = Transfer {
            id,
            peer: peer.into(),
            direction,
            status: TransferStatus::Queued,
            bytes: 0,
            total,
        };
        info!("{id}: queued {:?} transfer with {}", direction, transfer.peer);
        self.transfers.insert(id, transfer);
        Ok(id)
    }

    /// Applies a driver update.  Updates for unknown or finished transfers
    /// are ignored.  Returns the record if it changed.
    pub fn apply(&mut self, update: TransferUpdate) -> Option<&Transfer> {
        let id = update.id();
        let Some(transfer) = self.transfers.get_mut(&id) else {
            warn!("update for unknown {id} ignored");
            return None;
        };
        if transfer.status.is_finished() {
            debug!("update for finished {id} ignored: {update:?}");
            return None;
        }
        let finishing = matches!(
            update,
            TransferUpdate::Completed { .. } | TransferUpdate::Failed { .. }
        );
        match update {
            TransferUpdate::Started(_) => transfer.status = TransferStatus::Active,
            TransferUpdate::Progress { bytes, .. } => transfer.bytes = bytes,
            TransferUpdate::Completed { bytes, .. } => {
                transfer.bytes = bytes;
                transfer.status = TransferStatus::Completed;
                info!("{id}: completed ({bytes} bytes)");
            }
            TransferUpdate::Failed { reason, .. } => {
                warn!("{id}: failed: {reason}");
                transfer.status = TransferStatus::Failed(reason);
            }
        }
        if finishing {
            self.evict_finished(self.retained);
        }
        self.transfers.get(&id)
    }

    /// Removes a finished record.  Unfinished transfers cannot be dismissed.
    pub fn dismiss(&mut self, id: TransferId) -> Option<Transfer> {
        match self.transfers.get(&id) {
            Some(t) if t.status.is_finished() => self.transfers.remove(&id),
            Some(_) => {
                debug!("{id} is still running and was not dismissed");
                None
            }
            None => None,
        }
    }

    /// Removes every finished record and returns how many went.
    pub fn clear_finished(&mut self) -> usize {
        self.evict_finished(0)
    }

    /// Drops the oldest finished records until at most `keep` remain.
    fn evict_finished(&mut self, keep: usize) -> usize {
        let finished: Vec<TransferId> = self
            .transfers
            .values()
            .filter(|t| t.status.is_finished())
            .map(|t| t.id)
            .collect();
        let excess = finished.len().saturating_sub(keep);
        for id in &finished[..excess] {
            self.transfers.remove(id);
        }
        if excess > 0 {
            debug!("pruned {excess} finished transfer record(s)");
        }
        excess
    }

    pub fn get(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    /// Transfers in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }

    /// Number of transfers not yet completed or failed.
    pub fn unfinished(&self) -> usize {
        self.transfers
            .values()
            .filter(|t| !t.status.is_finished())
            .count()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Refuses new transfers.  Existing records still receive updates.
    pub fn stop_accepting(&mut self) {
        if self.accepting {
            debug!("transfer queue stopped accepting ({} unfinished)", self.unfinished());
        }
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_assigns_sequential_ids() {
        let mut queue = TransferQueue::new();

        let a = queue.enqueue("dev-a", Direction::Outbound, Some(10)).unwrap();
        let b = queue.enqueue("dev-b", Direction::Inbound, None).unwrap();

        assert_ne!(a, b);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get(a).unwrap().status, TransferStatus::Queued);
        let ids: Vec<_> = queue.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_updates_drive_status() {
        // Arrange
        let mut queue = TransferQueue::new();
        let id = queue.enqueue("dev", Direction::Outbound, Some(5)).unwrap();

        // Act / Assert
        queue.apply(TransferUpdate::Started(id));
        assert_eq!(queue.get(id).unwrap().status, TransferStatus::Active);

        queue.apply(TransferUpdate::Progress { id, bytes: 3 });
        assert_eq!(queue.get(id).unwrap().bytes, 3);

        queue.apply(TransferUpdate::Completed { id, bytes: 5 });
        let transfer = queue.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(transfer.bytes, 5);
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn test_finished_transfer_ignores_late_updates() {
        let mut queue = TransferQueue::new();
        let id = queue.enqueue("dev", Direction::Outbound, None).unwrap();
        queue.apply(TransferUpdate::Failed {
            id,
            reason: "refused".into(),
        });

        let changed = queue.apply(TransferUpdate::Completed { id, bytes: 1 });

        assert!(changed.is_none());
        assert_eq!(
            queue.get(id).unwrap().status,
            TransferStatus::Failed("refused".into())
        );
    }

    #[test]
    fn test_stop_accepting_refuses_new_but_updates_existing() {
        let mut queue = TransferQueue::new();
        let id = queue.enqueue("dev", Direction::Outbound, None).unwrap();

        queue.stop_accepting();

        assert!(matches!(
            queue.enqueue("dev", Direction::Outbound, None),
            Err(CollaboratorError::Stopped(_))
        ));
        assert!(queue.apply(TransferUpdate::Started(id)).is_some());
    }

    fn finish(queue: &mut TransferQueue, id: TransferId) {
        queue.apply(TransferUpdate::Completed { id, bytes: 1 });
    }

    #[test]
    fn test_retention_evicts_oldest_finished_and_keeps_unfinished() {
        // Arrange
        let mut queue = TransferQueue::with_retention(2);
        let running = queue.enqueue("slow", Direction::Inbound, None).unwrap();
        let ids: Vec<_> = (0..4)
            .map(|_| queue.enqueue("dev", Direction::Outbound, Some(1)).unwrap())
            .collect();

        // Act
        for id in &ids {
            finish(&mut queue, *id);
        }

        // Assert
        let kept: Vec<_> = queue.iter().map(|t| t.id).collect();
        assert_eq!(kept, vec![running, ids[2], ids[3]]);
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn test_dismiss_removes_only_finished_records() {
        let mut queue = TransferQueue::new();
        let done = queue.enqueue("a", Direction::Outbound, None).unwrap();
        let running = queue.enqueue("b", Direction::Outbound, None).unwrap();
        finish(&mut queue, done);

        assert!(queue.dismiss(running).is_none());
        assert_eq!(queue.dismiss(done).map(|t| t.id), Some(done));
        assert!(queue.dismiss(done).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear_finished_keeps_active_transfers() {
        let mut queue = TransferQueue::new();
        let a = queue.enqueue("a", Direction::Outbound, None).unwrap();
        let b = queue.enqueue("b", Direction::Inbound, None).unwrap();
        let c = queue.enqueue("c", Direction::Outbound, None).unwrap();
        queue.apply(TransferUpdate::Started(b));
        finish(&mut queue, a);
        queue.apply(TransferUpdate::Failed {
            id: c,
            reason: "reset".into(),
        });

        let removed = queue.clear_finished();

        assert_eq!(removed, 2);
        assert_eq!(queue.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b]);
    }
}
