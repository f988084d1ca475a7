//! Packet dispatcher – turns one inbound [`ServerPacket`] into world
//! mutations, listener notifications and (at most one) protocol reply.
//!
//! [`dispatch`] is a plain function over `&mut World` so the session can run
//! it under its write lock and fire listeners only after the lock is
//! released.  Packets are validated before anything is touched; a rejected
//! packet leaves the world exactly as it was.

use log::debug;

use crate::error::SessionError;
use crate::protocol::{ChatMessage, ClientPacket, MessageType, ServerPacket};
use crate::types::{Rotation, Vec3};
use crate::world::{Entity, EntityKind, World};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A listener notification produced while applying a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Chat(ChatMessage),
    EntitySpawned(Entity),
    EntityDestroyed(Entity),
    EntityUpdated(Entity),
}

/// Everything that must happen after a packet was applied, in emit order.
#[derive(Debug, Default, PartialEq)]
pub struct Dispatch {
    pub notifications: Vec<Notification>,
    /// Packet to send back to the server.
    pub reply: Option<ClientPacket>,
}

impl Dispatch {
    fn notify(notification: Notification) -> Self {
        Self {
            notifications: vec![notification],
            reply: None,
        }
    }

    fn reply(packet: ClientPacket) -> Self {
        Self {
            notifications: Vec::new(),
            reply: Some(packet),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.reply.is_none()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Apply `packet` to `world`.
pub fn dispatch(world: &mut World, packet: ServerPacket) -> Result<Dispatch, SessionError> {
    let kind = packet.kind();

    let out = match packet {
        ServerPacket::Chat {
            message,
            message_type,
        } => {
            if message_type == MessageType::Chat {
                Dispatch::notify(Notification::Chat(message))
            } else {
                Dispatch::default()
            }
        }

        ServerPacket::JoinGame { entity_id } => {
            debug!("join-game announced self entity id {}", entity_id);
            world.announce_self(entity_id);
            Dispatch::default()
        }

        ServerPacket::PlayerHealth {
            health,
            food,
            saturation,
        } => {
            if !health.is_finite() || !saturation.is_finite() {
                return Err(malformed(kind, "non-finite health or saturation"));
            }
            if !world.set_vitals(health, food, saturation) {
                debug!("health update before self-player spawn, ignoring");
            }
            Dispatch::default()
        }

        ServerPacket::PlayerPositionRotation {
            x,
            y,
            z,
            yaw,
            pitch,
        } => {
            ensure_finite(kind, Vec3::new(x, y, z), Rotation::new(yaw, pitch))?;
            Dispatch::reply(ClientPacket::PlayerPositionRotation {
                on_ground: false,
                x,
                y,
                z,
                yaw,
                pitch,
            })
        }

        ServerPacket::SpawnPlayer {
            entity_id,
            uuid,
            position,
            rotation,
        } => {
            ensure_finite(kind, position, rotation)?;
            let mut entity = Entity::new(entity_id, uuid, EntityKind::Player);
            entity.position = position;
            entity.rotation = rotation;
            if world.spawn(entity) {
                debug!("bound self-player to entity {}", entity_id);
            }
            Dispatch::default()
        }

        ServerPacket::SpawnObject {
            entity_id,
            uuid,
            object_type,
            position,
            rotation,
            velocity,
            data,
        } => {
            ensure_finite(kind, position, rotation)?;
            if !velocity.is_finite() {
                return Err(malformed(kind, "non-finite velocity"));
            }
            let mut entity = Entity::new(entity_id, uuid, EntityKind::Object { object_type });
            entity.position = position;
            entity.rotation = rotation;
            entity.velocity = velocity;
            entity.data = Some(data);
            world.spawn(entity.clone());
            Dispatch::notify(Notification::EntitySpawned(entity))
        }

        ServerPacket::DestroyEntities { entity_ids } => Dispatch {
            notifications: entity_ids
                .into_iter()
                .filter_map(|id| world.remove(id))
                .map(Notification::EntityDestroyed)
                .collect(),
            reply: None,
        },

        ServerPacket::EntityMetadata {
            entity_id,
            metadata,
        } => match world.update_metadata(entity_id, &metadata) {
            Some(entity) => Dispatch::notify(Notification::EntityUpdated(entity)),
            None => Dispatch::default(),
        },

        ServerPacket::Other { .. } => Dispatch::default(),
    };

    Ok(out)
}

fn ensure_finite(kind: &'static str, position: Vec3, rotation: Rotation) -> Result<(), SessionError> {
    if !position.is_finite() {
        return Err(malformed(kind, format!("non-finite position {position}")));
    }
    if !rotation.is_finite() {
        return Err(malformed(kind, "non-finite rotation"));
    }
    Ok(())
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> SessionError {
    SessionError::MalformedPacket {
        kind,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
