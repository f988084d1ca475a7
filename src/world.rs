//! `World` – the session's local mirror of server-announced entities.
//!
//! The world is owned by the session and only mutated by the packet
//! dispatcher (under the session's write lock).  Everything handed to the
//! outside is a clone, so listeners and UI collaborators always read a
//! stable snapshot.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{MetadataEntry, MetadataValue};
use crate::types::{Rotation, Vec3};

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Object { object_type: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: i32,
    pub uuid: Uuid,
    pub kind: EntityKind,
    pub position: Vec3,
    pub rotation: Rotation,
    pub velocity: Vec3,
    /// Spawn data word for objects; `None` for players.
    pub data: Option<i32>,
    /// Metadata from the most recent update.
    pub metadata: BTreeMap<u8, MetadataValue>,
}

impl Entity {
    pub fn new(entity_id: i32, uuid: Uuid, kind: EntityKind) -> Self {
        Self {
            entity_id,
            uuid,
            kind,
            position: Vec3::zero(),
            rotation: Rotation::default(),
            velocity: Vec3::zero(),
            data: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player)
    }

    /// Replace the metadata with `entries`.  Within one update a repeated
    /// index keeps its last value.
    pub fn set_metadata(&mut self, entries: &[MetadataEntry]) {
        self.metadata = entries
            .iter()
            .map(|entry| (entry.index, entry.value.clone()))
            .collect();
    }
}

/// Snapshot of the locally controlled player: its registry entry plus vital
/// statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfPlayer {
    pub entity: Entity,
    /// 0–20 nominal.
    pub health: f32,
    /// 0–20.
    pub food: i32,
    pub food_saturation: f32,
}

impl SelfPlayer {
    fn with_vitals(entity: Entity, vitals: Vitals) -> Self {
        Self {
            entity,
            health: vitals.health,
            food: vitals.food,
            food_saturation: vitals.food_saturation,
        }
    }

    pub fn entity_id(&self) -> i32 {
        self.entity.entity_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vitals {
    health: f32,
    food: i32,
    food_saturation: f32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            health: 20.0,
            food: 20,
            food_saturation: 5.0,
        }
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct World {
    /// Entity registry, keyed by server entity id.
    entities: HashMap<i32, Entity>,
    /// Entity id announced by the last join-game packet.
    pending_self_id: Option<i32>,
    /// Registry key of the self-player, while bound.
    self_id: Option<i32>,
    vitals: Vitals,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Insert (or replace) an entity.  If its id is the announced self id
    /// and it is a player, it becomes the self-player.  Returns whether it
    /// was bound.
    ///
    /// Replacing the bound entity with one that does not bind releases the
    /// self-player.
    pub fn spawn(&mut self, entity: Entity) -> bool {
        let id = entity.entity_id;
        let bind = entity.is_player() && self.pending_self_id == Some(id);
        if bind {
            self.self_id = Some(id);
            self.vitals = Vitals::default();
        } else if self.self_id == Some(id) {
            self.self_id = None;
        }
        self.entities.insert(id, entity);
        bind
    }

    /// Remove an entity.  Releases the self-player if it was that entity.
    pub fn remove(&mut self, entity_id: i32) -> Option<Entity> {
        let removed = self.entities.remove(&entity_id)?;
        if self.self_id == Some(entity_id) {
            self.self_id = None;
        }
        Some(removed)
    }

    /// Overwrite an existing entity's metadata and return its updated state.
    pub fn update_metadata(&mut self, entity_id: i32, entries: &[MetadataEntry]) -> Option<Entity> {
        let entity = self.entities.get_mut(&entity_id)?;
        entity.set_metadata(entries);
        Some(entity.clone())
    }

    pub fn get(&self, entity_id: i32) -> Option<&Entity> {
        self.entities.get(&entity_id)
    }

    pub fn contains(&self, entity_id: i32) -> bool {
        self.entities.contains_key(&entity_id)
    }

    pub fn entities(&self) -> &HashMap<i32, Entity> {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // ------------------------------------------------------------------
    // Self-player
    // ------------------------------------------------------------------

    /// Record the id announced at join-game.  Last announcement wins.
    pub fn announce_self(&mut self, entity_id: i32) {
        self.pending_self_id = Some(entity_id);
    }

    pub fn pending_self_id(&self) -> Option<i32> {
        self.pending_self_id
    }

    /// The bound self-player, read from its registry entry.
    pub fn self_player(&self) -> Option<SelfPlayer> {
        let entity = self.entities.get(&self.self_id?)?;
        Some(SelfPlayer::with_vitals(entity.clone(), self.vitals))
    }

    /// Overwrite the self-player's vitals.  Returns `false` when no
    /// self-player is bound yet.
    pub fn set_vitals(&mut self, health: f32, food: i32, saturation: f32) -> bool {
        if self.self_id.is_none() {
            return false;
        }
        self.vitals = Vitals {
            health,
            food,
            food_saturation: saturation,
        };
        true
    }

    /// Reset all state (called on disconnect).
    pub fn clear(&mut self) {
        self.entities.clear();
        self.pending_self_id = None;
        self.self_id = None;
        self.vitals = Vitals::default();
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.self_id.is_none() && self.pending_self_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: i32) -> Entity {
        Entity::new(id, Uuid::from_u128(id as u128), EntityKind::Player)
    }

    fn object(id: i32) -> Entity {
        Entity::new(
            id,
            Uuid::from_u128(id as u128),
            EntityKind::Object {
                object_type: "minecraft:item".into(),
            },
        )
    }

    // ---------------------------------------------------------------
    // Registry lifecycle
    // ---------------------------------------------------------------

    #[test]
    fn spawn_and_remove_entity() {
        let mut w = World::new();
        w.spawn(object(1));
        assert_eq!(w.entity_count(), 1);
        assert!(w.contains(1));

        let removed = w.remove(1).unwrap();
        assert_eq!(removed.entity_id, 1);
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn remove_missing_entity_is_noop() {
        let mut w = World::new();
        w.spawn(object(1));
        assert!(w.remove(99).is_none());
        assert_eq!(w.entity_count(), 1);
    }

    #[test]
    fn spawn_same_id_twice_replaces() {
        let mut w = World::new();
        let mut a = object(3);
        a.data = Some(1);
        let mut b = object(3);
        b.data = Some(2);
        w.spawn(a);
        w.spawn(b);
        assert_eq!(w.entity_count(), 1);
        assert_eq!(w.get(3).unwrap().data, Some(2));
    }

    // ---------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------

    #[test]
    fn metadata_update_replaces_previous_values() {
        let mut w = World::new();
        w.spawn(object(4));
        w.update_metadata(4, &[MetadataEntry::new(0, MetadataValue::Byte(1))]);
        let e = w
            .update_metadata(4, &[MetadataEntry::new(2, MetadataValue::Boolean(true))])
            .unwrap();
        assert_eq!(e.metadata.len(), 1);
        assert_eq!(e.metadata[&2], MetadataValue::Boolean(true));
        assert_eq!(w.get(4).unwrap().metadata, e.metadata);
    }

    #[test]
    fn repeated_index_in_one_update_keeps_last_value() {
        let mut w = World::new();
        w.spawn(object(5));
        let e = w
            .update_metadata(
                5,
                &[
                    MetadataEntry::new(0, MetadataValue::Byte(0)),
                    MetadataEntry::new(0, MetadataValue::Byte(0x20)),
                ],
            )
            .unwrap();
        assert_eq!(e.metadata.len(), 1);
        assert_eq!(e.metadata[&0], MetadataValue::Byte(0x20));
    }

    #[test]
    fn metadata_for_missing_entity_is_ignored() {
        let mut w = World::new();
        assert!(w
            .update_metadata(1, &[MetadataEntry::new(0, MetadataValue::Boolean(true))])
            .is_none());
        assert_eq!(w.entity_count(), 0);
    }

    // ---------------------------------------------------------------
    // Self-player binding
    // ---------------------------------------------------------------

    #[test]
    fn player_with_announced_id_becomes_self() {
        let mut w = World::new();
        w.announce_self(7);
        assert!(!w.spawn(player(6)));
        assert!(w.self_player().is_none());
        assert!(w.spawn(player(7)));
        assert_eq!(w.self_player().unwrap().entity_id(), 7);
    }

    #[test]
    fn object_with_announced_id_is_not_self() {
        let mut w = World::new();
        w.announce_self(7);
        assert!(!w.spawn(object(7)));
        assert!(w.self_player().is_none());
    }

    #[test]
    fn last_announcement_wins() {
        let mut w = World::new();
        w.announce_self(7);
        w.announce_self(8);
        assert!(!w.spawn(player(7)));
        assert!(w.spawn(player(8)));
    }

    #[test]
    fn vitals_require_bound_player() {
        let mut w = World::new();
        assert!(!w.set_vitals(10.0, 15, 2.5));
        w.announce_self(1);
        w.spawn(player(1));
        assert!(w.set_vitals(10.0, 15, 2.5));
        let p = w.self_player().unwrap();
        assert_eq!(p.health, 10.0);
        assert_eq!(p.food, 15);
        assert_eq!(p.food_saturation, 2.5);
    }

    #[test]
    fn removing_self_entity_releases_binding() {
        let mut w = World::new();
        w.announce_self(1);
        w.spawn(player(1));
        w.remove(1);
        assert!(w.self_player().is_none());
    }

    #[test]
    fn reusing_self_id_for_another_entity_releases_binding() {
        let mut w = World::new();
        w.announce_self(7);
        w.spawn(player(7));
        assert!(w.self_player().is_some());

        assert!(!w.spawn(object(7)));
        assert!(!w.get(7).unwrap().is_player());
        assert!(w.self_player().is_none());
        assert!(!w.set_vitals(1.0, 1, 1.0));
    }

    #[test]
    fn respawn_of_self_id_rebinds_with_fresh_vitals() {
        let mut w = World::new();
        w.announce_self(7);
        w.spawn(player(7));
        w.set_vitals(3.0, 4, 0.0);
        let mut again = player(7);
        again.position = Vec3::new(1.0, 2.0, 3.0);
        assert!(w.spawn(again));
        let p = w.self_player().unwrap();
        assert_eq!(p.entity.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(p.health, 20.0);
    }

    #[test]
    fn self_metadata_stays_in_sync() {
        let mut w = World::new();
        w.announce_self(1);
        w.spawn(player(1));
        w.update_metadata(1, &[MetadataEntry::new(6, MetadataValue::Pose("crouching".into()))]);
        assert_eq!(
            w.self_player().unwrap().entity.metadata[&6],
            MetadataValue::Pose("crouching".into())
        );
    }

    // ---------------------------------------------------------------
    // Clear / reset
    // ---------------------------------------------------------------

    #[test]
    fn clear_resets_everything() {
        let mut w = World::new();
        w.announce_self(1);
        w.spawn(player(1));
        for i in 2..50 {
            w.spawn(object(i));
        }
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.entity_count(), 0);
        assert!(w.pending_self_id().is_none());
    }
}
