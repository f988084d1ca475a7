//! Play-state packets the session core understands.
//!
//! The wire codec (framing, compression, encryption, varints) lives in the
//! transport.  By the time a packet reaches this crate it has been decoded
//! into one of the types below, and outbound packets are handed back to the
//! transport in the same typed form.
//!
//! ## Packet set
//!
//! | Direction        | Kind                       | Handled by                     |
//! |------------------|----------------------------|--------------------------------|
//! | server → client  | `chat`                     | log + `on_chat`                |
//! | server → client  | `join_game`                | pending self-player id         |
//! | server → client  | `player_health`            | self-player vitals             |
//! | server → client  | `player_position_rotation` | echoed back as acknowledgement |
//! | server → client  | `spawn_player`             | registry (+ self-player bind)  |
//! | server → client  | `spawn_object`             | registry + `on_entity_spawn`   |
//! | server → client  | `destroy_entities`         | registry + `on_entity_destroy` |
//! | server → client  | `entity_metadata`          | registry + `on_entity_update`  |
//! | server → client  | anything else (`other`)    | ignored                        |
//! | client → server  | `chat`                     | `Session::send_message`        |
//! | client → server  | `player_position_rotation` | position acknowledgement       |
//!
//! Every type is `Serialize + Deserialize` with snake_case JSON so transports
//! and the replay tool can carry packets as text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Rotation, Vec3};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Where the client is asked to display a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Chat,
    System,
    /// Action bar / notification area.
    Notification,
}

/// A (simplified) chat component tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<ChatMessage>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extra: Vec::new(),
        }
    }

    /// Plain text of this component and all of its children, in order.
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.extra {
            child.collect_text(out);
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_text())
    }
}

// ---------------------------------------------------------------------------
// Entity metadata
// ---------------------------------------------------------------------------

/// One decoded metadata value.  The core stores these without interpreting
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Byte(i8),
    VarInt(i32),
    Float(f32),
    String(String),
    Chat(ChatMessage),
    Boolean(bool),
    Position { x: i32, y: i32, z: i32 },
    OptionalUuid(Option<Uuid>),
    Pose(String),
    Raw(Vec<u8>),
}

/// A single `(index, value)` entry of an entity-metadata packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub index: u8,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub fn new(index: u8, value: MetadataValue) -> Self {
        Self { index, value }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerPacket {
    Chat {
        message: ChatMessage,
        #[serde(default)]
        message_type: MessageType,
    },
    JoinGame {
        entity_id: i32,
    },
    PlayerHealth {
        health: f32,
        food: i32,
        saturation: f32,
    },
    PlayerPositionRotation {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    },
    SpawnPlayer {
        entity_id: i32,
        uuid: Uuid,
        position: Vec3,
        #[serde(default)]
        rotation: Rotation,
    },
    SpawnObject {
        entity_id: i32,
        uuid: Uuid,
        /// Object type name (e.g. `"minecraft:arrow"`).
        object_type: String,
        position: Vec3,
        #[serde(default)]
        rotation: Rotation,
        #[serde(default)]
        velocity: Vec3,
        /// Type-specific spawn data word.
        #[serde(default)]
        data: i32,
    },
    DestroyEntities {
        entity_ids: Vec<i32>,
    },
    EntityMetadata {
        entity_id: i32,
        metadata: Vec<MetadataEntry>,
    },
    /// Any packet kind the core does not model.
    Other {
        name: String,
    },
}

impl ServerPacket {
    /// Short snake_case kind name, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::JoinGame { .. } => "join_game",
            Self::PlayerHealth { .. } => "player_health",
            Self::PlayerPositionRotation { .. } => "player_position_rotation",
            Self::SpawnPlayer { .. } => "spawn_player",
            Self::SpawnObject { .. } => "spawn_object",
            Self::DestroyEntities { .. } => "destroy_entities",
            Self::EntityMetadata { .. } => "entity_metadata",
            Self::Other { .. } => "other",
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientPacket {
    Chat {
        message: String,
    },
    PlayerPositionRotation {
        on_ground: bool,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    },
}

impl ClientPacket {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::PlayerPositionRotation { .. } => "player_position_rotation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_text_walks_children_in_order() {
        let msg = ChatMessage {
            text: "<steve> ".into(),
            extra: vec![
                ChatMessage::text("hello "),
                ChatMessage {
                    text: "wor".into(),
                    extra: vec![ChatMessage::text("ld")],
                },
            ],
        };
        assert_eq!(msg.full_text(), "<steve> hello world");
    }

    #[test]
    fn server_packet_json_shape() {
        let json = r#"{"kind":"join_game","entity_id":7}"#;
        let packet: ServerPacket = serde_json::from_str(json).unwrap();
        assert_eq!(packet, ServerPacket::JoinGame { entity_id: 7 });
        assert_eq!(packet.kind(), "join_game");
    }

    #[test]
    fn spawn_object_defaults_optional_fields() {
        let json = r#"{
            "kind": "spawn_object",
            "entity_id": 12,
            "uuid": "00000000-0000-0000-0000-00000000000c",
            "object_type": "minecraft:arrow",
            "position": {"x": 1.0, "y": 2.0, "z": 3.0}
        }"#;
        let packet: ServerPacket = serde_json::from_str(json).unwrap();
        match packet {
            ServerPacket::SpawnObject {
                velocity,
                rotation,
                data,
                ..
            } => {
                assert_eq!(velocity, Vec3::zero());
                assert_eq!(rotation, Rotation::default());
                assert_eq!(data, 0);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn chat_defaults_to_chat_type() {
        let json = r#"{"kind":"chat","message":{"text":"hi"}}"#;
        let packet: ServerPacket = serde_json::from_str(json).unwrap();
        assert!(matches!(
            packet,
            ServerPacket::Chat {
                message_type: MessageType::Chat,
                ..
            }
        ));
    }
}
