//! TCP transport with optional TLS.
//!
//! A [`LanTransport`] is split in two halves:
//!
//! - the **handle**, owned by the application, which implements
//!   [`Transport`].  Its methods never block; they push [`Command`]s into an
//!   unbounded channel.
//! - the **driver**, a Tokio task spawned by [`Transport::start`], which owns
//!   the socket.  It connects, optionally runs the TLS handshake, then
//!   multiplexes socket reads with incoming commands.  Everything it observes
//!   is sent back as a [`TransportEvent`].
//!
//! Writes issued before the channel is connected are queued in the command
//! channel and then in the driver's pending buffer, and are flushed in order
//! as soon as `Connected` is reached.
//!
//! The handle filters events through [`TransportState::after`], so a late
//! event from the driver (for example data that raced an `abort`) is never
//! delivered once the handle is terminal.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use lanshare_core::{
    PeerAddress, Role, Transport, TransportError, TransportEvent, TransportFactory, TransportState,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::tls::TlsConfig;

const READ_BUFFER: usize = 16 * 1024;

/// Instructions from the handle to the driver task.
#[derive(Debug)]
enum Command {
    Write(Vec<u8>),
    Close,
    Abort,
}

/// What the driver starts from.
enum Endpoint {
    Connect(PeerAddress),
    Accepted(TcpStream),
}

/// A TCP connection, upgraded to TLS when a [`TlsConfig`] is supplied.
pub struct LanTransport {
    role: Role,
    peer: Option<SocketAddr>,
    state: TransportState,
    close_requested: bool,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    /// Driver inputs, present until `start` consumes them.
    pending_start: Option<PendingStart>,
}

struct PendingStart {
    endpoint: Endpoint,
    tls: Option<TlsConfig>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl LanTransport {
    /// An idle initiator that will connect to `address:port` when started.
    pub fn connect(tls: Option<TlsConfig>, address: IpAddr, port: u16) -> Self {
        let peer = PeerAddress::new(address, port);
        Self::with_endpoint(Role::Initiator, Some(peer.socket_addr()), tls, Endpoint::Connect(peer))
    }

    /// An idle acceptor wrapping a socket returned by `accept`.
    pub fn accepted(tls: Option<TlsConfig>, stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self::with_endpoint(Role::Acceptor, peer, tls, Endpoint::Accepted(stream))
    }

    fn with_endpoint(
        role: Role,
        peer: Option<SocketAddr>,
        tls: Option<TlsConfig>,
        endpoint: Endpoint,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            role,
            peer,
            state: TransportState::Idle,
            close_requested: false,
            commands: cmd_tx,
            events: event_rx,
            pending_start: Some(PendingStart {
                endpoint,
                tls,
                commands: cmd_rx,
                events: event_tx,
            }),
        }
    }

    /// Remote socket address, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn label(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown peer".to_string())
    }
}

#[async_trait]
impl Transport for LanTransport {
    fn role(&self) -> Role {
        self.role
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn start(&mut self) {
        let Some(pending) = self.pending_start.take() else {
            debug!("start() on {} ignored: already started", self.label());
            return;
        };
        let driver = Driver {
            label: self.label(),
            role: self.role,
            tls: pending.tls,
            commands: pending.commands,
            events: pending.events,
            pending: VecDeque::new(),
            close_requested: false,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(driver.run(pending.endpoint));
            }
            Err(_) => {
                warn!("cannot start transport to {}: no Tokio runtime", driver.label);
                driver.emit(TransportEvent::StateChanged(TransportState::Connecting));
                driver.emit(TransportEvent::Error(TransportError::Io(
                    "no async runtime available".to_string(),
                )));
            }
        }
    }

    fn write(&mut self, data: &[u8]) {
        if self.state.is_terminal() || self.close_requested {
            debug!("write of {} bytes to {} dropped: transport is closing", data.len(), self.label());
            return;
        }
        if data.is_empty() {
            return;
        }
        let _ = self.commands.send(Command::Write(data.to_vec()));
    }

    fn close(&mut self) {
        if self.state.is_terminal() || self.close_requested {
            return;
        }
        self.close_requested = true;
        let _ = self.commands.send(Command::Close);
    }

    fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!("aborting transport to {} in state {}", self.label(), self.state);
        self.state = TransportState::Closed;
        // Dropping an unstarted endpoint closes an accepted socket.
        self.pending_start = None;
        let _ = self.commands.send(Command::Abort);
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if self.state.is_terminal() {
                return None;
            }
            if self.pending_start.is_some() {
                debug!("next_event() on {} before start()", self.label());
                return None;
            }
            let Some(event) = self.events.recv().await else {
                // Driver ended without a terminal event; treat as closed.
                self.state = TransportState::Closed;
                return None;
            };
            match self.state.after(&event) {
                Some(next) => {
                    self.state = next;
                    return Some(event);
                }
                None => debug!("dropping {:?} from {} in state {}", event, self.label(), self.state),
            }
        }
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.commands.send(Command::Abort);
        }
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

struct Driver {
    label: String,
    role: Role,
    tls: Option<TlsConfig>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    /// Writes received before `Connected`.
    pending: VecDeque<Vec<u8>>,
    close_requested: bool,
}

impl Driver {
    async fn run(mut self, endpoint: Endpoint) {
        self.emit(TransportEvent::StateChanged(TransportState::Connecting));

        let (tcp, peer_ip) = match endpoint {
            Endpoint::Accepted(stream) => {
                let ip = stream.peer_addr().map(|a| a.ip()).ok();
                (stream, ip)
            }
            Endpoint::Connect(peer) => {
                debug!("connecting to {peer}");
                match self.until(TcpStream::connect(peer.socket_addr())).await {
                    None => return self.aborted(),
                    Some(Ok(stream)) => (stream, Some(peer.address)),
                    Some(Err(e)) => {
                        return self.fail(TransportError::Connect {
                            peer: peer.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("set_nodelay on {} failed: {e}", self.label);
        }

        let Some(tls) = self.tls.clone() else {
            return self.pump(tcp).await;
        };

        self.emit(TransportEvent::StateChanged(TransportState::TlsHandshaking));
        match self.role {
            Role::Initiator => {
                let (Some(connector), Some(ip)) = (tls.connector(), peer_ip) else {
                    return self.fail(TransportError::Tls(
                        "no client TLS configuration".to_string(),
                    ));
                };
                match self.until(connector.connect(tls.server_name_for(ip), tcp)).await {
                    None => self.aborted(),
                    Some(Ok(stream)) => self.pump(stream).await,
                    Some(Err(e)) => self.fail(TransportError::Tls(e.to_string())),
                }
            }
            Role::Acceptor => {
                let Some(acceptor) = tls.acceptor() else {
                    return self.fail(TransportError::Tls(
                        "no server certificate configured".to_string(),
                    ));
                };
                match self.until(acceptor.accept(tcp)).await {
                    None => self.aborted(),
                    Some(Ok(stream)) => self.pump(stream).await,
                    Some(Err(e)) => self.fail(TransportError::Tls(e.to_string())),
                }
            }
        }
    }

    /// Runs `fut` to completion while buffering commands.  Returns `None` if
    /// the transport was aborted first.
    async fn until<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Write(chunk)) => self.pending.push_back(chunk),
                    Some(Command::Close) => self.close_requested = true,
                    Some(Command::Abort) | None => return None,
                },
            }
        }
    }

    async fn pump<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!("transport to {} connected", self.label);
        self.emit(TransportEvent::StateChanged(TransportState::Connected));

        // Returning drops both halves, which closes the socket.
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            while let Some(chunk) = self.pending.pop_front() {
                match self.until(writer.write_all(&chunk)).await {
                    None => return self.aborted(),
                    Some(Ok(())) => {}
                    Some(Err(e)) => return self.fail(TransportError::Io(e.to_string())),
                }
            }
            if self.close_requested {
                return self.finish(&mut writer).await;
            }

            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("{} closed the connection", self.label);
                        return self.finish(&mut writer).await;
                    }
                    Ok(n) => self.emit(TransportEvent::Data(buf[..n].to_vec())),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("{} closed the connection without close_notify", self.label);
                        return self.finish(&mut writer).await;
                    }
                    Err(e) => return self.fail(TransportError::Io(e.to_string())),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Write(chunk)) => self.pending.push_back(chunk),
                    Some(Command::Close) => self.close_requested = true,
                    Some(Command::Abort) | None => return self.aborted(),
                },
            }
        }
    }

    /// Graceful shutdown: `Closing`, flush and half-close, then `Closed`.
    /// An abort while the peer is not reading drops the stream instead.
    async fn finish<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) {
        self.emit(TransportEvent::StateChanged(TransportState::Closing));
        match self.until(writer.flush()).await {
            None => return self.aborted(),
            Some(Err(e)) => debug!("flush to {} failed during close: {e}", self.label),
            Some(Ok(())) => {}
        }
        match self.until(writer.shutdown()).await {
            None => return self.aborted(),
            Some(Err(e)) => debug!("shutdown of {} failed during close: {e}", self.label),
            Some(Ok(())) => {}
        }
        info!("transport to {} closed", self.label);
        self.emit(TransportEvent::Closed);
    }

    fn fail(&self, error: TransportError) {
        warn!("transport to {} failed: {error}", self.label);
        self.emit(TransportEvent::Error(error));
    }

    fn aborted(&self) {
        debug!("transport to {} aborted", self.label);
    }

    fn emit(&self, event: TransportEvent) {
        // The handle may already be gone; nothing left to notify.
        let _ = self.events.send(event);
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Payload of the `transport/lan` capability.
#[derive(Debug, Clone, Default)]
pub struct LanTransportFactory {
    tls: Option<TlsConfig>,
}

impl LanTransportFactory {
    pub fn new(tls: Option<TlsConfig>) -> Self {
        Self { tls }
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }
}

impl TransportFactory for LanTransportFactory {
    fn connect(&self, peer: PeerAddress) -> Box<dyn Transport> {
        Box::new(LanTransport::connect(self.tls.clone(), peer.address, peer.port))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
