//! Session events delivered over a channel instead of callbacks.
//!
//! A UI collaborator that prefers to poll (a render loop, a TUI) subscribes
//! with [`Session::subscribe`](crate::Session::subscribe) and drains the
//! receiver at its own pace.  The channel is bounded and the session only
//! ever `try_send`s into it: when the consumer falls behind, events are
//! dropped and counted, the session never waits.  Dropping the
//! [`Subscription`] unregisters its listener.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::listener::{ListenerId, ListenerSet, SessionListener};
use crate::protocol::ChatMessage;
use crate::types::ConnectionState;
use crate::world::Entity;

/// One listener notification, owned.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Connected,
    Disconnected { reason: String },
    Chat(ChatMessage),
    Tick,
    EntitySpawned(Entity),
    EntityDestroyed(Entity),
    EntityUpdated(Entity),
}

/// Listener that forwards every callback into a bounded channel.
#[derive(Debug)]
pub struct ChannelListener {
    tx: Sender<SessionEvent>,
    /// When false, tick events are not forwarded.
    forward_ticks: bool,
    dropped: Arc<AtomicU64>,
}

impl ChannelListener {
    pub fn new(buffer: usize, forward_ticks: bool) -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(buffer.max(1));
        let listener = Self {
            tx,
            forward_ticks,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (listener, rx)
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    fn push(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    log::warn!("session event channel full – {} events dropped", dropped);
                }
            }
            // Receiver gone; the subscription unregisters on drop.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl SessionListener for ChannelListener {
    fn on_state_changed(&self, state: ConnectionState) {
        self.push(SessionEvent::StateChanged(state));
    }

    fn on_connect(&self) {
        self.push(SessionEvent::Connected);
    }

    fn on_disconnect(&self, reason: &str) {
        self.push(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn on_chat(&self, message: &ChatMessage) {
        self.push(SessionEvent::Chat(message.clone()));
    }

    fn on_tick(&self) {
        if self.forward_ticks {
            self.push(SessionEvent::Tick);
        }
    }

    fn on_entity_spawn(&self, entity: &Entity) {
        self.push(SessionEvent::EntitySpawned(entity.clone()));
    }

    fn on_entity_destroy(&self, entity: &Entity) {
        self.push(SessionEvent::EntityDestroyed(entity.clone()));
    }

    fn on_entity_update(&self, entity: &Entity) {
        self.push(SessionEvent::EntityUpdated(entity.clone()));
    }
}

/// Receiving end of a session subscription.  Unregisters its listener when
/// dropped.
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    events: Receiver<SessionEvent>,
    dropped: Arc<AtomicU64>,
    listeners: Weak<ListenerSet>,
}

impl Subscription {
    pub(crate) fn new(
        id: ListenerId,
        events: Receiver<SessionEvent>,
        dropped: Arc<AtomicU64>,
        listeners: Weak<ListenerSet>,
    ) -> Self {
        Self {
            id,
            events,
            dropped,
            listeners,
        }
    }

    /// Listener id to pass to `Session::remove_listener`.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Drain all pending events without blocking.
    pub fn poll(&self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Events lost because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_callbacks_as_events() {
        let (listener, rx) = ChannelListener::new(16, true);
        listener.on_state_changed(ConnectionState::Connecting);
        listener.on_connect();
        listener.on_tick();
        listener.on_disconnect("bye");

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::StateChanged(ConnectionState::Connecting),
                SessionEvent::Connected,
                SessionEvent::Tick,
                SessionEvent::Disconnected {
                    reason: "bye".into()
                },
            ]
        );
    }

    #[test]
    fn ticks_can_be_filtered() {
        let (listener, rx) = ChannelListener::new(16, false);
        listener.on_tick();
        listener.on_connect();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![SessionEvent::Connected]);
    }

    #[test]
    fn full_channel_drops_and_counts() {
        let (listener, rx) = ChannelListener::new(2, true);
        for _ in 0..5 {
            listener.on_tick();
        }
        assert_eq!(listener.dropped_counter().load(Ordering::Relaxed), 3);
        assert_eq!(rx.try_iter().count(), 2);
    }

    fn subscribe(set: &Arc<ListenerSet>) -> Subscription {
        let (listener, rx) = ChannelListener::new(4, false);
        let dropped = listener.dropped_counter();
        let id = set.add(Arc::new(listener));
        Subscription::new(id, rx, dropped, Arc::downgrade(set))
    }

    #[test]
    fn dropping_subscription_unregisters_listener() {
        let set = Arc::new(ListenerSet::new());
        let kept = subscribe(&set);
        let gone = subscribe(&set);
        let gone_id = gone.id();
        assert_eq!(set.len(), 2);

        drop(gone);
        assert_eq!(set.len(), 1);
        assert!(!set.remove(gone_id));

        set.notify(|l| l.on_connect());
        assert_eq!(kept.poll(), vec![SessionEvent::Connected]);
    }

    #[test]
    fn removed_subscription_drops_cleanly() {
        let set = Arc::new(ListenerSet::new());
        let sub = subscribe(&set);
        assert!(set.remove(sub.id()));
        drop(sub);
        assert!(set.is_empty());
    }

    #[test]
    fn subscription_outliving_its_listener_set_drops_cleanly() {
        let set = Arc::new(ListenerSet::new());
        let sub = subscribe(&set);
        drop(set);
        assert!(sub.poll().is_empty());
        drop(sub);
    }
}
