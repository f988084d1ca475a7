//! Session facade – connection lifecycle, packet intake, listener fan-out.
//!
//! ## Locking
//!
//! | Lock        | Guards                                   | Held while calling out? |
//! |-------------|------------------------------------------|-------------------------|
//! | `lifecycle` | detach / attach of the active link       | transport, state change |
//! | `link`      | transport handle, tick loop, generation  | never                   |
//! | `world`     | registry, pending self id, self-player   | never                   |
//! | `state`     | connection state                         | never                   |
//!
//! Lock order where nested: `world` → `state`.  Listeners never run under
//! `link`, `world` or `state`, and `lifecycle` is re-entrant, so a callback
//! may read state or call `connect`/`disconnect`.
//!
//! ## Generations
//!
//! Every attach and detach bumps `generation`.  Transport and tick callbacks
//! carry the generation they were created for and are dropped once it is
//! stale, so a transport that has been torn down can no longer touch the
//! world.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::dispatch::{dispatch, Notification};
use crate::error::SessionError;
use crate::events::{ChannelListener, Subscription};
use crate::listener::{ListenerId, ListenerSet, SessionListener};
use crate::log_buffer::LogBuffer;
use crate::protocol::{ClientPacket, ServerPacket};
use crate::tick::TickLoop;
use crate::transport::{Connector, Credentials, Transport, TransportSink};
use crate::types::{ConnectionState, GameProfile, LogEntry, SessionInfo};
use crate::world::{Entity, SelfPlayer, World};

const SCOPE_CLIENT: &str = "Client";
const SCOPE_CHAT: &str = "Chat";
const SCOPE_PACKET: &str = "Packet";
const SCOPE_TICK: &str = "Tick";

/// One open transport and the tick loop that runs alongside it.
struct Link {
    generation: u64,
    transport: Arc<dyn Transport>,
    tick: Option<TickLoop>,
}

struct SessionCore {
    info: SessionInfo,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: RwLock<ConnectionState>,
    world: RwLock<World>,
    listeners: Arc<ListenerSet>,
    log: LogBuffer,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    lifecycle: ReentrantMutex<()>,
}

/// Client play session.  Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    /// Validates the endpoint; nothing is opened until [`connect`](Self::connect).
    pub fn new(
        info: SessionInfo,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SessionError> {
        info.server.validate()?;
        let log = LogBuffer::new(config.log_capacity);
        Ok(Self {
            core: Arc::new(SessionCore {
                info,
                config,
                connector,
                state: RwLock::new(ConnectionState::Disconnected),
                world: RwLock::new(World::new()),
                listeners: Arc::new(ListenerSet::new()),
                log,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                lifecycle: ReentrantMutex::new(()),
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open a connection as `profile`.  An active connection is torn down
    /// first.  Returns once the handshake has been started; completion is
    /// reported through `on_connect` / `on_disconnect`.
    pub fn connect(&self, profile: GameProfile, client_token: Uuid) {
        let _lifecycle = loop {
            self.disconnect();
            let guard = self.core.lifecycle.lock();
            if self.core.link.lock().is_none() {
                break guard;
            }
        };

        let generation = self.core.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.set_state(generation, ConnectionState::Connecting) {
            log::debug!("connect superseded from on_state_changed, abandoning");
            return;
        }
        self.core.log.info(
            SCOPE_CLIENT,
            format!("Connecting to {} as {}", self.core.info.server, profile.name),
        );

        let credentials = Credentials {
            profile,
            client_token,
            access_token: self.core.info.account.access_token.clone(),
        };
        let transport = match self.core.connector.open(&self.core.info.server, &credentials) {
            Ok(transport) => transport,
            Err(e) => {
                self.core.log.error(
                    SCOPE_CLIENT,
                    format!("Failed to connect to {}: {e}", self.core.info.server),
                );
                self.finish_disconnect(generation, &e.to_string());
                return;
            }
        };

        transport.set_sink(Some(Arc::new(SinkHandle {
            core: Arc::downgrade(&self.core),
            generation,
        })));

        let tick = match self.spawn_tick(generation) {
            Ok(tick) => tick,
            Err(e) => {
                transport.set_sink(None);
                self.core
                    .log
                    .error(SCOPE_TICK, format!("Failed to start tick loop: {e}"));
                self.finish_disconnect(generation, &e.to_string());
                return;
            }
        };

        {
            let mut link = self.core.link.lock();
            // A listener may have reconnected from inside on_state_changed.
            if link.is_some() || !self.is_current(generation) {
                drop(link);
                log::debug!("connect superseded by a nested connect, abandoning");
                transport.set_sink(None);
                let mut tick = tick;
                tick.stop();
                return;
            }
            *link = Some(Link {
                generation,
                transport: transport.clone(),
                tick: Some(tick),
            });
        }

        transport.connect();
    }

    /// Close the active connection, if any.
    ///
    /// The tick loop is stopped before the world is cleared.  When this
    /// returns the session is `Disconnected`, listeners have received
    /// `on_disconnect`, and late events from the old transport are ignored.
    pub fn disconnect(&self) {
        let reason = self.core.config.disconnect_reason.clone();
        let detached = {
            let _lifecycle = self.core.lifecycle.lock();
            let Some(link) = self.core.link.lock().take() else {
                return;
            };
            let generation = self.core.generation.fetch_add(1, Ordering::AcqRel) + 1;
            self.set_state(generation, ConnectionState::Disconnecting);

            if link.transport.is_connected() {
                link.transport.disconnect(&reason);
            }
            link.transport.set_sink(None);
            (link, generation)
        };

        let (mut link, generation) = detached;
        if let Some(mut tick) = link.tick.take() {
            tick.stop();
        }
        drop(link);
        self.finish_disconnect(generation, &reason);
    }

    /// `true` unless fully disconnected.
    pub fn is_active(&self) -> bool {
        if self.state() != ConnectionState::Disconnected {
            return true;
        }
        self.transport().is_some_and(|t| t.is_connected())
    }

    /// Send a chat message.  Dropped silently without a connection.
    pub fn send_message(&self, message: impl Into<String>) {
        let Some(transport) = self.transport() else {
            log::debug!("send_message while disconnected, dropping");
            return;
        };
        transport.send(ClientPacket::Chat {
            message: message.into(),
        });
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    pub fn info(&self) -> &SessionInfo {
        &self.core.info
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.core.state.read()
    }

    pub fn player(&self) -> Option<SelfPlayer> {
        self.core.world.read().self_player()
    }

    /// Snapshot of the registry ordered by entity id.
    pub fn entities(&self) -> Vec<Entity> {
        let world = self.core.world.read();
        let mut out: Vec<Entity> = world.entities().values().cloned().collect();
        out.sort_by_key(|e| e.entity_id);
        out
    }

    pub fn entity(&self, entity_id: i32) -> Option<Entity> {
        self.core.world.read().get(entity_id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.core.world.read().entity_count()
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.core.log.entries()
    }

    /// Receive the full log snapshot after every append.
    pub fn subscribe_log(&self, buffer: usize) -> Receiver<Vec<LogEntry>> {
        self.core.log.subscribe(buffer)
    }

    /// Ticks of the current connection, or `None` while disconnected.
    pub fn tick_count(&self) -> Option<u64> {
        self.core
            .link
            .lock()
            .as_ref()
            .and_then(|l| l.tick.as_ref())
            .map(TickLoop::tick_count)
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        self.core.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    /// Register a bounded event channel.  Events are dropped (and counted)
    /// when the consumer falls behind.  Dropping the returned
    /// [`Subscription`] unregisters it.
    pub fn subscribe(&self, buffer: usize, forward_ticks: bool) -> Subscription {
        let (listener, events) = ChannelListener::new(buffer, forward_ticks);
        let dropped = listener.dropped_counter();
        let id = self.add_listener(Arc::new(listener));
        Subscription::new(id, events, dropped, Arc::downgrade(&self.core.listeners))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn is_current(&self, generation: u64) -> bool {
        self.core.generation.load(Ordering::Acquire) == generation
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.core.link.lock().as_ref().map(|l| l.transport.clone())
    }

    fn transport_for(&self, generation: u64) -> Option<Arc<dyn Transport>> {
        self.core
            .link
            .lock()
            .as_ref()
            .filter(|l| l.generation == generation)
            .map(|l| l.transport.clone())
    }

    /// Store `state`, then notify.  Returns `false` if `generation` was (or
    /// became, inside a listener) stale.
    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        {
            let mut current = self.core.state.write();
            if !self.is_current(generation) {
                return false;
            }
            *current = state;
        }
        self.emit_for(generation, SCOPE_CLIENT, |l| l.on_state_changed(state));
        self.is_current(generation)
    }

    /// Clear the world and move to `Disconnected` in one step, log, then
    /// notify.  Skipped when a newer connection has started in the meantime.
    fn finish_disconnect(&self, generation: u64, reason: &str) {
        {
            let mut world = self.core.world.write();
            if !self.is_current(generation) {
                log::debug!("stale disconnect ({}) ignored", reason);
                return;
            }
            world.clear();
            *self.core.state.write() = ConnectionState::Disconnected;
        }
        self.core
            .log
            .warn(SCOPE_CLIENT, format!("Disconnected: {reason}"));
        self.emit_for(generation, SCOPE_CLIENT, |l| {
            l.on_state_changed(ConnectionState::Disconnected)
        });
        self.emit_for(generation, SCOPE_CLIENT, |l| l.on_disconnect(reason));
    }

    fn spawn_tick(&self, generation: u64) -> std::io::Result<TickLoop> {
        let on_tick = {
            let core = Arc::downgrade(&self.core);
            move || {
                if let Some(core) = core.upgrade() {
                    Session { core }.on_tick(generation);
                }
            }
        };
        let on_fault = {
            let core = Arc::downgrade(&self.core);
            move |msg: String| {
                if let Some(core) = core.upgrade() {
                    core.log.error(SCOPE_TICK, format!("Tick failed: {msg}"));
                }
            }
        };
        TickLoop::spawn(
            &format!("mc-session-tick-{generation}"),
            self.core.config.tick_interval(),
            on_tick,
            on_fault,
        )
    }

    fn emit<F>(&self, scope: &str, f: F)
    where
        F: Fn(&dyn SessionListener),
    {
        for failure in self.core.listeners.notify(f) {
            self.core
                .log
                .error(scope, format!("Listener failed: {failure}"));
        }
    }

    /// Like [`emit`](Self::emit), but each listener is skipped once
    /// `generation` is stale, so a listener that reconnects or disconnects
    /// cuts the fan-out short.
    fn emit_for<F>(&self, generation: u64, scope: &str, f: F)
    where
        F: Fn(&dyn SessionListener),
    {
        self.emit(scope, |l| {
            if self.is_current(generation) {
                f(l)
            }
        });
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    fn on_tick(&self, generation: u64) {
        self.emit_for(generation, SCOPE_TICK, |l| l.on_tick());
    }

    fn on_transport_connected(&self, generation: u64, remote_address: &str) {
        {
            let mut state = self.core.state.write();
            if !self.is_current(generation) {
                return;
            }
            *state = ConnectionState::Connected;
        }
        self.core
            .log
            .success(SCOPE_CLIENT, format!("Connected to {remote_address}"));
        self.emit_for(generation, SCOPE_CLIENT, |l| {
            l.on_state_changed(ConnectionState::Connected)
        });
        self.emit_for(generation, SCOPE_CLIENT, |l| l.on_connect());
    }

    fn on_transport_disconnected(&self, generation: u64, reason: &str) {
        let detached = {
            let _lifecycle = self.core.lifecycle.lock();
            let mut slot = self.core.link.lock();
            match slot.as_ref() {
                Some(link) if link.generation == generation && self.is_current(generation) => {}
                _ => return,
            }
            let Some(link) = slot.take() else {
                return;
            };
            drop(slot);
            let generation = self.core.generation.fetch_add(1, Ordering::AcqRel) + 1;
            link.transport.set_sink(None);
            (link, generation)
        };

        let (mut link, generation) = detached;
        if let Some(mut tick) = link.tick.take() {
            tick.stop();
        }
        drop(link);
        self.finish_disconnect(generation, reason);
    }

    fn on_packet(&self, generation: u64, packet: ServerPacket) {
        let result = {
            let mut world = self.core.world.write();
            if !self.is_current(generation) {
                return;
            }
            dispatch(&mut world, packet)
        };

        let out = match result {
            Ok(out) => out,
            Err(e) => {
                self.core.log.error(SCOPE_PACKET, e.to_string());
                return;
            }
        };

        if let Some(reply) = out.reply {
            if let Some(transport) = self.transport_for(generation) {
                transport.send(reply);
            }
        }

        for notification in out.notifications {
            match notification {
                Notification::Chat(message) => {
                    if !self.is_current(generation) {
                        return;
                    }
                    self.core.log.info(SCOPE_CHAT, message.full_text());
                    self.emit_for(generation, SCOPE_PACKET, |l| l.on_chat(&message));
                }
                Notification::EntitySpawned(entity) => {
                    self.emit_for(generation, SCOPE_PACKET, |l| l.on_entity_spawn(&entity));
                }
                Notification::EntityDestroyed(entity) => {
                    self.emit_for(generation, SCOPE_PACKET, |l| l.on_entity_destroy(&entity));
                }
                Notification::EntityUpdated(entity) => {
                    self.emit_for(generation, SCOPE_PACKET, |l| l.on_entity_update(&entity));
                }
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.core.info.server)
            .field("state", &self.state())
            .field("entities", &self.entity_count())
            .field("listeners", &self.core.listeners.len())
            .finish()
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        let Some(mut link) = self.link.get_mut().take() else {
            return;
        };
        link.transport.set_sink(None);
        if link.transport.is_connected() {
            link.transport.disconnect(&self.config.disconnect_reason);
        }
        if let Some(mut tick) = link.tick.take() {
            tick.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Transport sink
// ---------------------------------------------------------------------------

/// Sink registered on one transport.  Holds the session weakly so an
/// abandoned transport cannot keep it alive.
struct SinkHandle {
    core: Weak<SessionCore>,
    generation: u64,
}

impl SinkHandle {
    fn session(&self) -> Option<Session> {
        self.core.upgrade().map(|core| Session { core })
    }
}

impl TransportSink for SinkHandle {
    fn connected(&self, remote_address: &str) {
        if let Some(session) = self.session() {
            session.on_transport_connected(self.generation, remote_address);
        }
    }

    fn disconnected(&self, reason: &str) {
        if let Some(session) = self.session() {
            session.on_transport_disconnected(self.generation, reason);
        }
    }

    fn packet_received(&self, packet: ServerPacket) {
        if let Some(session) = self.session() {
            session.on_packet(self.generation, packet);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Account, LogLevel, ServerEndpoint};

    struct Refusing;

    impl Connector for Refusing {
        fn open(
            &self,
            endpoint: &ServerEndpoint,
            _credentials: &Credentials,
        ) -> Result<Arc<dyn Transport>, SessionError> {
            Err(SessionError::Transport(format!("{endpoint} refused")))
        }
    }

    fn info(host: &str, port: u16) -> SessionInfo {
        SessionInfo {
            server: ServerEndpoint::new(host, port),
            account: Account {
                username: "steve".into(),
                access_token: "token".into(),
            },
        }
    }

    #[derive(Default)]
    struct Disconnects(Mutex<Vec<String>>);

    impl SessionListener for Disconnects {
        fn on_disconnect(&self, reason: &str) {
            self.0.lock().push(reason.to_string());
        }
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = Session::new(info("", 25565), SessionConfig::default(), Arc::new(Refusing))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidEndpoint { .. }));
        assert!(Session::new(info("localhost", 0), SessionConfig::default(), Arc::new(Refusing)).is_err());
    }

    #[test]
    fn new_session_is_idle() {
        let s = Session::new(info("localhost", 25565), SessionConfig::default(), Arc::new(Refusing))
            .unwrap();
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(!s.is_active());
        assert!(s.player().is_none());
        assert!(s.entities().is_empty());
        assert!(s.tick_count().is_none());
    }

    #[test]
    fn disconnect_without_connection_is_a_no_op() {
        let s = Session::new(info("localhost", 25565), SessionConfig::default(), Arc::new(Refusing))
            .unwrap();
        let seen = Arc::new(Disconnects::default());
        s.add_listener(seen.clone());
        s.disconnect();
        assert!(seen.0.lock().is_empty());
        assert!(s.log_entries().is_empty());
    }

    #[test]
    fn connector_failure_is_absorbed() {
        let s = Session::new(info("localhost", 25565), SessionConfig::default(), Arc::new(Refusing))
            .unwrap();
        let seen = Arc::new(Disconnects::default());
        s.add_listener(seen.clone());

        s.connect(GameProfile::new(Uuid::nil(), "steve"), Uuid::nil());

        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(!s.is_active());
        assert_eq!(seen.0.lock().len(), 1);
        assert!(seen.0.lock()[0].contains("refused"));
        let levels: Vec<LogLevel> = s.log_entries().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Error, LogLevel::Warning]);
    }

    #[test]
    fn send_message_while_disconnected_is_silent() {
        let s = Session::new(info("localhost", 25565), SessionConfig::default(), Arc::new(Refusing))
            .unwrap();
        s.send_message("nobody hears this");
        assert!(s.log_entries().is_empty());
    }
}
