// world.rs - slot arena that owns every entity the scripts can see

use crate::ecs::Entity;
use crate::math::Vector3;
use thiserror::Error;

/// Per-entity state the native engine exposes through internal calls.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    pub name: String,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("entity {entity} is not alive")]
    NotAlive { entity: Entity },
}

struct Slot {
    generation: u32,
    data: Option<EntityData>,
}

/// Stable-indexed entity table.
///
/// Despawning bumps the slot's generation before the slot is reused, so a
/// handle copied before the despawn never resolves to the new occupant.
pub struct World {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl World {
    /// Create a new empty world.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Spawn an entity, reusing a despawned slot when one is available.
    pub fn spawn(&mut self, name: impl Into<String>, position: Vector3) -> Entity {
        let data = EntityData {
            name: name.into(),
            position,
        };

        let entity = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.data = Some(data);
                Entity::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    data: Some(data),
                });
                Entity::new(index, 0)
            }
        };

        self.live += 1;
        tracing::debug!(%entity, "spawned entity");
        entity
    }

    /// Despawn an entity.
    ///
    /// Returns false when the handle is already stale.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let Some(slot) = self.slot_mut(entity) else {
            return false;
        };
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index());
        self.live -= 1;
        tracing::debug!(%entity, "despawned entity");
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Get entity data, or None if the handle is stale.
    pub fn get(&self, entity: Entity) -> Option<&EntityData> {
        let slot = self.slots.get(entity.index() as usize)?;
        if slot.generation != entity.generation() {
            return None;
        }
        slot.data.as_ref()
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut EntityData> {
        self.slot_mut(entity)?.data.as_mut()
    }

    /// Like [`World::get`], but reports a stale handle as an error.
    pub fn entity(&self, entity: Entity) -> Result<&EntityData, WorldError> {
        self.get(entity).ok_or(WorldError::NotAlive { entity })
    }

    pub fn entity_mut(&mut self, entity: Entity) -> Result<&mut EntityData, WorldError> {
        self.get_mut(entity).ok_or(WorldError::NotAlive { entity })
    }

    /// Number of live entities.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Iterate live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &EntityData)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.data
                .as_ref()
                .map(|data| (Entity::new(index as u32, slot.generation), data))
        })
    }

    fn slot_mut(&mut self, entity: Entity) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(entity.index() as usize)?;
        if slot.generation != entity.generation() || slot.data.is_none() {
            return None;
        }
        Some(slot)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
