//! One task per transfer: drive the transport to a terminal state and report.
//!
//! These functions run on spawned tasks, away from the event loop.  They own
//! the transport outright and only communicate through the
//! [`TransferUpdate`] channel, so every queue mutation still happens on the
//! loop.

use lanshare_core::{PayloadHandler, Transport, TransportEvent, TransportState};
use tokio::sync::mpsc;
use tracing::debug;

use super::transfer_queue::{TransferId, TransferUpdate};

const ENDED_UNEXPECTEDLY: &str = "transport ended without closing";

/// Sends `payload` and closes.  Completes once the peer has the bytes and the
/// channel is closed; any transport error fails the transfer.
pub async fn drive_outbound(
    id: TransferId,
    mut transport: Box<dyn Transport>,
    payload: Vec<u8>,
    updates: mpsc::UnboundedSender<TransferUpdate>,
) {
    let total = payload.len() as u64;
    transport.write(&payload);
    transport.close();
    transport.start();

    let mut result = None;
    while let Some(event) = transport.next_event().await {
        match event {
            TransportEvent::StateChanged(TransportState::Connected) => {
                let _ = updates.send(TransferUpdate::Started(id));
            }
            TransportEvent::Data(chunk) => {
                debug!("{id}: ignoring {} bytes from the receiver", chunk.len());
            }
            TransportEvent::Error(e) => result = Some(Err(e.to_string())),
            TransportEvent::Closed => result = Some(Ok(())),
            TransportEvent::StateChanged(_) => {}
        }
    }

    let update = match result {
        Some(Ok(())) => TransferUpdate::Completed { id, bytes: total },
        Some(Err(reason)) => TransferUpdate::Failed { id, reason },
        None => TransferUpdate::Failed {
            id,
            reason: ENDED_UNEXPECTEDLY.to_string(),
        },
    };
    let _ = updates.send(update);
}

/// Receives until the sender closes, feeding `handler` when there is one.
pub async fn drive_inbound(
    id: TransferId,
    mut transport: Box<dyn Transport>,
    mut handler: Option<Box<dyn PayloadHandler>>,
    updates: mpsc::UnboundedSender<TransferUpdate>,
) {
    transport.start();

    let mut bytes = 0u64;
    while let Some(event) = transport.next_event().await {
        match event {
            TransportEvent::StateChanged(TransportState::Connected) => {
                let _ = updates.send(TransferUpdate::Started(id));
            }
            TransportEvent::Data(chunk) => {
                bytes += chunk.len() as u64;
                if let Some(handler) = handler.as_mut() {
                    handler.receive(&chunk);
                }
                let _ = updates.send(TransferUpdate::Progress { id, bytes });
            }
            TransportEvent::Error(e) => {
                let _ = updates.send(TransferUpdate::Failed {
                    id,
                    reason: e.to_string(),
                });
                return;
            }
            TransportEvent::Closed => {
                if let Some(handler) = handler.as_mut() {
                    handler.finish();
                }
                let _ = updates.send(TransferUpdate::Completed { id, bytes });
                return;
            }
            TransportEvent::StateChanged(_) => {}
        }
    }
    let _ = updates.send(TransferUpdate::Failed {
        id,
        reason: ENDED_UNEXPECTEDLY.to_string(),
    });
}
