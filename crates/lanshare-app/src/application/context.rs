//! The application context: single composition root of a LanShare process.
//!
//! [`Application`] owns the plugin registry, the device roster, the identity
//! settings, and the collaborators.  All of them are mutated only through
//! `&mut Application`, which in a running daemon means only from the task
//! executing [`Application::run`].  Everything asynchronous reaches that task
//! through channels:
//!
//! ```text
//! enumerators ── SourceEvent ──────┐
//! transfer tasks ── TransferUpdate ┼──► Application::run() ──► DeviceModel
//! listener ── InboundConnection ───┘                       └─► TransferQueue / ActionLog
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use lanshare_core::{
    Capability, Device, DeviceEnumerator, DeviceModel, LoadError, PeerAddress, Plugin,
    PluginContext, PluginHandle, PluginRegistry, PresenceSink, RegistryError, RegistryEvent,
    RosterChange, SourceEvent, SourceId, Transport, TransportFactory,
};
use lanshare_lan::CAPABILITY_TRANSPORT_LAN;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::action_log::{ActionLevel, ActionLog};
use super::drive_transfer::{drive_inbound, drive_outbound};
use super::handler_registry::HandlerRegistry;
use super::identity::{IdentitySettings, KeyValueStore, SettingsError, KEY_DEVICE_NAME};
use super::transfer_queue::{Direction, TransferId, TransferQueue, TransferStatus, TransferUpdate};
use super::CollaboratorError;
use crate::infrastructure::storage::config::AppConfig;

/// Content type whose handler receives inbound payloads.
pub const DEFAULT_CONTENT_TYPE: &str = "file";

/// Extra presence field carrying a per-device port override.
pub const FIELD_PORT: &str = "port";

/// An accepted transport together with a label for its peer.
pub type InboundConnection = (String, Box<dyn Transport>);

/// Errors from [`Application::connect`] and [`Application::send_to`].
#[derive(Debug, Error)]
pub enum ConnectDeviceError {
    #[error("no device {0} in the roster")]
    UnknownDevice(String),

    #[error("device {0} has no usable network address")]
    NoAddress(String),

    #[error("no plugin provides {0}")]
    NoTransport(String),

    #[error("transfers need a running Tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Errors from [`Application::load_plugin`].
#[derive(Debug, Error)]
pub enum LoadPluginError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Wakes [`Application::run`] so it shuts down.  Cloneable and usable from
/// any task.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

struct ActiveEnumerator {
    source: SourceId,
    enumerator: Box<dyn DeviceEnumerator>,
}

enum LoopEvent {
    Presence(SourceEvent),
    Transfer(TransferUpdate),
    Inbound(InboundConnection),
}

/// The composition root.
pub struct Application {
    config: AppConfig,
    identity: IdentitySettings,
    registry: PluginRegistry,
    roster: DeviceModel,
    transfers: TransferQueue,
    handlers: HandlerRegistry,
    actions: ActionLog,
    /// Enumerators started for each loaded plugin.
    enumerators: HashMap<PluginHandle, Vec<ActiveEnumerator>>,
    presence_tx: mpsc::UnboundedSender<SourceEvent>,
    presence_rx: mpsc::UnboundedReceiver<SourceEvent>,
    updates_tx: mpsc::UnboundedSender<TransferUpdate>,
    updates_rx: mpsc::UnboundedReceiver<TransferUpdate>,
    inbound_tx: mpsc::UnboundedSender<InboundConnection>,
    inbound_rx: mpsc::UnboundedReceiver<InboundConnection>,
    shutdown: ShutdownHandle,
    accepting: bool,
}

impl Application {
    pub fn new(config: AppConfig, store: Box<dyn KeyValueStore>) -> Self {
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            config,
            identity: IdentitySettings::new(store),
            registry: PluginRegistry::new(),
            roster: DeviceModel::new(),
            transfers: TransferQueue::new(),
            handlers: HandlerRegistry::new(),
            actions: ActionLog::new(),
            enumerators: HashMap::new(),
            presence_tx,
            presence_rx,
            updates_tx,
            updates_rx,
            inbound_tx,
            inbound_rx,
            shutdown: ShutdownHandle::default(),
            accepting: true,
        }
    }

    // ── Identity ──────────────────────────────────────────────────────────────

    /// The persisted device UUID, generated on first use.
    pub fn device_identifier(&mut self) -> String {
        self.identity.device_uuid()
    }

    /// The persisted display name, defaulting to the host name.
    pub fn device_display_name(&mut self) -> String {
        self.identity.device_name()
    }

    /// Renames this device.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the new name cannot be persisted.
    pub fn set_device_display_name(&mut self, name: &str) -> Result<(), SettingsError> {
        self.identity.set(KEY_DEVICE_NAME, name)
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn roster(&self) -> &DeviceModel {
        &self.roster
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn transfers(&self) -> &TransferQueue {
        &self.transfers
    }

    /// Removes a finished transfer record.
    pub fn dismiss_transfer(&mut self, id: TransferId) -> bool {
        self.transfers.dismiss(id).is_some()
    }

    /// Removes every finished transfer record.
    pub fn clear_finished_transfers(&mut self) -> usize {
        self.transfers.clear_finished()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn actions(&self) -> &ActionLog {
        &self.actions
    }

    pub fn subscribe_roster(&mut self) -> mpsc::UnboundedReceiver<RosterChange> {
        self.roster.subscribe()
    }

    pub fn subscribe_registry(&mut self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Where the listener should hand accepted transports.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundConnection> {
        self.inbound_tx.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    // ── Plugins ───────────────────────────────────────────────────────────────

    /// Loads `plugin` and activates its capabilities: enumerators become
    /// roster sources and are started; handlers are registered by content
    /// type.  Loading an already-loaded source returns its handle unchanged.
    ///
    /// # Errors
    ///
    /// Returns the registry's [`LoadError`], or
    /// [`CollaboratorError::Stopped`] after [`shutdown`](Self::shutdown).
    /// Nothing is activated in either case.
    pub fn load_plugin(
        &mut self,
        plugin: Arc<dyn Plugin>,
    ) -> Result<PluginHandle, LoadPluginError> {
        if !self.accepting {
            debug!("plugin {} refused during shutdown", plugin.source());
            return Err(CollaboratorError::Stopped("plugin loading").into());
        }
        let ctx = PluginContext {
            device_uuid: self.device_identifier(),
            device_name: self.device_display_name(),
        };
        let before = self.registry.len();
        let handle = self.registry.load(plugin, &ctx)?;
        if self.registry.len() == before {
            return Ok(handle);
        }

        let capabilities: Vec<(String, Capability)> = self
            .registry
            .capabilities(handle)
            .into_iter()
            .map(|(name, cap)| (name.to_string(), cap.clone()))
            .collect();
        for (name, capability) in capabilities {
            match capability {
                Capability::Enumerator(factory) => {
                    let source = self.roster.add_source(format!("{handle}/{name}"));
                    let mut enumerator = factory();
                    enumerator.start(PresenceSink::new(source, self.presence_tx.clone()));
                    self.enumerators
                        .entry(handle)
                        .or_default()
                        .push(ActiveEnumerator { source, enumerator });
                }
                Capability::Handler(factory) => {
                    if let Err(e) = self.handlers.register(handle, factory) {
                        warn!("handler {name} of {handle} not registered: {e}");
                    }
                }
                Capability::Transport(_) => debug!("transport {name} available from {handle}"),
            }
        }
        Ok(handle)
    }

    /// Unloads `handle`: its enumerators are stopped and every device only
    /// they reported leaves the roster; its handlers are unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownHandle`] if `handle` is not loaded.
    pub fn unload_plugin(&mut self, handle: PluginHandle) -> Result<(), RegistryError> {
        let revoked = self.registry.unload(handle)?;
        debug!("{handle} revoked {} capabilities", revoked.len());

        for mut active in self.enumerators.remove(&handle).unwrap_or_default() {
            active.enumerator.stop();
            let removed = self.roster.remove_source(active.source);
            debug!("{} removed {removed} device(s)", active.source);
        }
        self.handlers.remove_plugin(handle);
        Ok(())
    }

    /// Number of enumerators currently running.
    pub fn active_enumerators(&self) -> usize {
        self.enumerators.values().map(Vec::len).sum()
    }

    fn transport_factory(&self, name: &str) -> Option<Arc<dyn TransportFactory>> {
        self.registry
            .find_by_capability(name)
            .into_iter()
            .find_map(|handle| match self.registry.capability(handle, name) {
                Some(Capability::Transport(factory)) => Some(Arc::clone(factory)),
                _ => None,
            })
    }

    // ── Transfers ─────────────────────────────────────────────────────────────

    /// The address an outbound transport to `device` should use.
    fn peer_of(&self, device: &Device) -> Option<PeerAddress> {
        let address = device.ip_addresses().into_iter().next()?;
        let port = device
            .extra
            .get(FIELD_PORT)
            .and_then(|v| v.as_u64())
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(self.config.lan.port);
        Some(PeerAddress::new(address, port))
    }

    /// An idle LAN transport to the roster entry `device_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectDeviceError`] if the device is unknown, has no IP
    /// address, or no plugin provides `transport/lan`.
    pub fn connect(&self, device_id: &str) -> Result<Box<dyn Transport>, ConnectDeviceError> {
        let device = self
            .roster
            .device(device_id)
            .ok_or_else(|| ConnectDeviceError::UnknownDevice(device_id.to_string()))?;
        let peer = self
            .peer_of(device)
            .ok_or_else(|| ConnectDeviceError::NoAddress(device_id.to_string()))?;
        let factory = self
            .transport_factory(CAPABILITY_TRANSPORT_LAN)
            .ok_or_else(|| ConnectDeviceError::NoTransport(CAPABILITY_TRANSPORT_LAN.to_string()))?;
        debug!("connecting to {device_id} at {peer}");
        Ok(factory.connect(peer))
    }

    /// Sends `payload` to `device_id` on a new transport.  Progress arrives
    /// through the event loop; a failure is recorded on the transfer and in
    /// the action log.  There is no retry.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectDeviceError`] if the transfer cannot be started.
    pub fn send_to(
        &mut self,
        device_id: &str,
        payload: Vec<u8>,
    ) -> Result<TransferId, ConnectDeviceError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConnectDeviceError::NoRuntime)?;
        let transport = self.connect(device_id)?;
        let id = self
            .transfers
            .enqueue(device_id, Direction::Outbound, Some(payload.len() as u64))?;
        runtime.spawn(drive_outbound(id, transport, payload, self.updates_tx.clone()));
        Ok(id)
    }

    /// Takes ownership of an accepted transport and receives from it.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::Stopped`] after shutdown; the transport is
    /// aborted then.
    pub fn accept(
        &mut self,
        peer: String,
        mut transport: Box<dyn Transport>,
    ) -> Result<TransferId, ConnectDeviceError> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                transport.abort();
                return Err(ConnectDeviceError::NoRuntime);
            }
        };
        let id = match self.transfers.enqueue(peer, Direction::Inbound, None) {
            Ok(id) => id,
            Err(e) => {
                transport.abort();
                return Err(e.into());
            }
        };
        let handler = self.handlers.create(DEFAULT_CONTENT_TYPE);
        if handler.is_none() {
            debug!("{id}: no {DEFAULT_CONTENT_TYPE} handler, payload is counted only");
        }
        runtime.spawn(drive_inbound(id, transport, handler, self.updates_tx.clone()));
        Ok(id)
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    fn dispatch(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Presence((source, presence)) => self.roster.apply(source, presence),
            LoopEvent::Transfer(update) => self.apply_transfer_update(update),
            LoopEvent::Inbound((peer, transport)) => {
                if let Err(e) = self.accept(peer.clone(), transport) {
                    warn!("inbound connection from {peer} refused: {e}");
                }
            }
        }
    }

    fn apply_transfer_update(&mut self, update: TransferUpdate) {
        let Some(transfer) = self.transfers.apply(update) else {
            return;
        };
        let message = match &transfer.status {
            TransferStatus::Completed => Some((
                ActionLevel::Info,
                format!("{} with {} completed ({} bytes)", transfer.id, transfer.peer, transfer.bytes),
            )),
            TransferStatus::Failed(reason) => Some((
                ActionLevel::Error,
                format!("{} with {} failed: {reason}", transfer.id, transfer.peer),
            )),
            TransferStatus::Queued | TransferStatus::Active => None,
        };
        if let Some((level, message)) = message {
            self.actions.record(level, message);
        }
    }

    /// Applies everything already queued for the loop without waiting.
    /// Returns how many events were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = if let Ok(e) = self.presence_rx.try_recv() {
                LoopEvent::Presence(e)
            } else if let Ok(u) = self.updates_rx.try_recv() {
                LoopEvent::Transfer(u)
            } else if let Ok(c) = self.inbound_rx.try_recv() {
                LoopEvent::Inbound(c)
            } else {
                return handled;
            };
            self.dispatch(event);
            handled += 1;
        }
    }

    /// Waits for one loop event and applies it.
    pub async fn pump_once(&mut self) {
        if let Some(event) =
            next_loop_event(&mut self.presence_rx, &mut self.updates_rx, &mut self.inbound_rx).await
        {
            self.dispatch(event);
        }
    }

    /// Runs the event loop until a shutdown is requested, then calls
    /// [`shutdown`](Self::shutdown).
    pub async fn run(&mut self) {
        info!("LanShare {} event loop running", self.version());
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = next_loop_event(&mut self.presence_rx, &mut self.updates_rx, &mut self.inbound_rx) => {
                    match event {
                        Some(event) => self.dispatch(event),
                        None => break,
                    }
                }
            }
        }
        self.shutdown();
        info!("event loop stopped");
    }

    /// Requests orderly termination.  Collaborators stop accepting new work
    /// and enumerators are stopped; transfers already running are left to
    /// finish or fail on their own.  Idempotent.
    pub fn shutdown(&mut self) {
        if self.accepting {
            info!(
                "shutting down ({} unfinished transfer(s))",
                self.transfers.unfinished()
            );
            self.accepting = false;
            self.transfers.stop_accepting();
            self.handlers.stop_accepting();
            self.actions.stop_accepting();
            for active in self.enumerators.values_mut().flatten() {
                active.enumerator.stop();
            }
        }
        self.shutdown.request();
    }

    pub fn is_shutting_down(&self) -> bool {
        !self.accepting
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("registry", &self.registry)
            .field("roster", &self.roster)
            .field("transfers", &self.transfers.len())
            .field("accepting", &self.accepting)
            .finish_non_exhaustive()
    }
}

async fn next_loop_event(
    presence: &mut mpsc::UnboundedReceiver<SourceEvent>,
    updates: &mut mpsc::UnboundedReceiver<TransferUpdate>,
    inbound: &mut mpsc::UnboundedReceiver<InboundConnection>,
) -> Option<LoopEvent> {
    tokio::select! {
        Some(event) = presence.recv() => Some(LoopEvent::Presence(event)),
        Some(update) = updates.recv() => Some(LoopEvent::Transfer(update)),
        Some(connection) = inbound.recv() => Some(LoopEvent::Inbound(connection)),
        else => None,
    }
}
