//! Transport seam – the boundary to the wire codec.
//!
//! ## Threading model
//!
//! ```text
//! codec / network thread     │  delivery thread           │  session
//! ────────────────────────── │ ────────────────────────── │ ─────────────────────
//! RemoteEnd::packet(p)       │                            │
//!   → events_tx.send(ev)     │  events_rx.recv()          │
//!                            │  → sink.packet_received(p) │  dispatch + listeners
//!                            │                            │
//! RemoteEnd::sent()          │                            │  Session::send_message
//!   ← outbound_rx.try_recv() │                            │  → transport.send(pkt)
//! ```
//!
//! A real codec implements [`Transport`] and [`Connector`] directly.
//! [`ChannelTransport`] is the in-process implementation used when the codec
//! already runs on its own thread and only needs somewhere to push decoded
//! events; the replay tool and the integration tests use it as well.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::protocol::{ClientPacket, ServerPacket};
use crate::types::{GameProfile, ServerEndpoint};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receiver of transport notifications.  The session registers one of these
/// on every transport it opens.
pub trait TransportSink: Send + Sync {
    fn connected(&self, remote_address: &str);
    fn disconnected(&self, reason: &str);
    fn packet_received(&self, packet: ServerPacket);
}

/// A single connection to a server.
///
/// `connect` starts the handshake and returns immediately; completion is
/// reported through the sink.  Implementations must not hold internal locks
/// while calling into the sink.
pub trait Transport: Send + Sync {
    /// Register (`Some`) or unregister (`None`) the event sink.
    fn set_sink(&self, sink: Option<Arc<dyn TransportSink>>);
    fn connect(&self);
    fn is_connected(&self) -> bool;
    /// Best effort; packets sent while not connected may be dropped.
    fn send(&self, packet: ClientPacket);
    /// Graceful close with a human-readable reason.
    fn disconnect(&self, reason: &str);
}

/// Opens transports.  Supplied to the session at construction.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Transport>, SessionError>;
}

/// Everything the protocol layer needs to log in.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub profile: GameProfile,
    pub client_token: Uuid,
    pub access_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("profile", &self.profile)
            .field("client_token", &self.client_token)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transport events
// ---------------------------------------------------------------------------

/// What a codec pushes into a [`ChannelTransport`].  Also the line format of
/// replay scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    Connected { remote_address: String },
    Packet { packet: ServerPacket },
    Disconnected { reason: String },
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

type SinkSlot = Arc<RwLock<Option<Arc<dyn TransportSink>>>>;

pub struct ChannelTransport {
    inbound: Mutex<Option<Receiver<TransportEvent>>>,
    outbound: Sender<ClientPacket>,
    sink: SinkSlot,
    connected: Arc<AtomicBool>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_reason: Arc<Mutex<Option<String>>>,
}

/// The codec-facing half of a [`ChannelTransport`].
#[derive(Debug, Clone)]
pub struct RemoteEnd {
    pub endpoint: ServerEndpoint,
    pub credentials: Credentials,
    events: Sender<TransportEvent>,
    sent: Receiver<ClientPacket>,
}

impl ChannelTransport {
    pub fn pair(endpoint: ServerEndpoint, credentials: Credentials) -> (Arc<Self>, RemoteEnd) {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();

        let transport = Arc::new(Self {
            inbound: Mutex::new(Some(events_rx)),
            outbound: outbound_tx,
            sink: Arc::new(RwLock::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            close_tx: Mutex::new(None),
            close_reason: Arc::new(Mutex::new(None)),
        });
        let remote = RemoteEnd {
            endpoint,
            credentials,
            events: events_tx,
            sent: outbound_rx,
        };
        (transport, remote)
    }
}

impl Transport for ChannelTransport {
    fn set_sink(&self, sink: Option<Arc<dyn TransportSink>>) {
        *self.sink.write() = sink;
    }

    fn connect(&self) {
        let Some(inbound) = self.inbound.lock().take() else {
            log::warn!("[transport] connect() called twice – ignoring");
            return;
        };
        let (close_tx, close_rx) = crossbeam_channel::bounded::<()>(0);
        *self.close_tx.lock() = Some(close_tx);

        let sink = self.sink.clone();
        let connected = self.connected.clone();
        let close_reason = self.close_reason.clone();
        let spawned = thread::Builder::new()
            .name("mc-session-delivery".into())
            .spawn(move || deliver(inbound, close_rx, sink, connected, close_reason));

        if let Err(e) = spawned {
            log::error!("[transport] failed to spawn delivery thread: {}", e);
            if let Some(sink) = current_sink(&self.sink) {
                sink.disconnected(&format!("failed to start transport: {e}"));
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, packet: ClientPacket) {
        if !self.is_connected() {
            log::debug!("[transport] dropping {} packet – not connected", packet.kind());
            return;
        }
        // Only fails once the remote end is gone.
        let _ = self.outbound.send(packet);
    }

    fn disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::Release);
        *self.close_reason.lock() = Some(reason.to_string());
        drop(self.close_tx.lock().take());
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        drop(self.close_tx.get_mut().take());
    }
}

fn current_sink(slot: &SinkSlot) -> Option<Arc<dyn TransportSink>> {
    slot.read().clone()
}

/// Delivery thread body: forward inbound events to the sink, in order, until
/// the connection closes from either side.
fn deliver(
    inbound: Receiver<TransportEvent>,
    close: Receiver<()>,
    sink: SinkSlot,
    connected: Arc<AtomicBool>,
    close_reason: Arc<Mutex<Option<String>>>,
) {
    let reason = loop {
        select! {
            recv(close) -> _ => {
                break close_reason.lock().take().unwrap_or_else(|| "Disconnected.".into());
            }
            recv(inbound) -> ev => match ev {
                Ok(TransportEvent::Connected { remote_address }) => {
                    connected.store(true, Ordering::Release);
                    if let Some(s) = current_sink(&sink) {
                        s.connected(&remote_address);
                    }
                }
                Ok(TransportEvent::Packet { packet }) => {
                    if let Some(s) = current_sink(&sink) {
                        s.packet_received(packet);
                    }
                }
                Ok(TransportEvent::Disconnected { reason }) => break reason,
                Err(_) => break "Connection closed.".to_string(),
            }
        }
    };

    connected.store(false, Ordering::Release);
    if let Some(s) = current_sink(&sink) {
        s.disconnected(&reason);
    }
    log::debug!("[transport] delivery thread exiting: {}", reason);
}

impl RemoteEnd {
    pub fn push(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn connected(&self, remote_address: &str) -> bool {
        self.push(TransportEvent::Connected {
            remote_address: remote_address.into(),
        })
    }

    pub fn packet(&self, packet: ServerPacket) -> bool {
        self.push(TransportEvent::Packet { packet })
    }

    pub fn disconnected(&self, reason: &str) -> bool {
        self.push(TransportEvent::Disconnected {
            reason: reason.into(),
        })
    }

    /// Drain packets the session has sent so far.
    pub fn sent(&self) -> Vec<ClientPacket> {
        let mut out = Vec::new();
        loop {
            match self.sent.try_recv() {
                Ok(p) => out.push(p),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ChannelConnector
// ---------------------------------------------------------------------------

/// Connector that opens a fresh [`ChannelTransport`] per `open` and hands
/// the remote end to whoever drives it.
pub struct ChannelConnector {
    remotes: Sender<RemoteEnd>,
    opened: AtomicUsize,
}

impl ChannelConnector {
    pub fn new() -> (Self, Receiver<RemoteEnd>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let connector = Self {
            remotes: tx,
            opened: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Number of transports opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }
}

impl Connector for ChannelConnector {
    fn open(
        &self,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Transport>, SessionError> {
        let (transport, remote) = ChannelTransport::pair(endpoint.clone(), credentials.clone());
        self.remotes
            .send(remote)
            .map_err(|_| SessionError::Transport("no driver for channel transport".into()))?;
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(transport)
    }
}
